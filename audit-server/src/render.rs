//! Server-rendered review page.

use policy_audit::{AnnotatedApplication, ContentFingerprint, GroupedResult, group_title};
use serde_json::Value;

use crate::form::FieldErrors;

/// Everything the review page can show.
#[derive(Debug, Default)]
pub struct PageView {
    pub server: String,
    pub api_key: String,
    pub field_errors: FieldErrors,
    pub api_error: Option<Value>,
    pub groups: Option<GroupedResult>,
}

pub fn page(view: &PageView) -> String {
    let mut html = String::with_capacity(4096);
    html.push_str(concat!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n",
        "<meta charset=\"utf-8\">\n",
        "<title>Policy Consolidation</title>\n",
        "<style>",
        "body{font-family:sans-serif;margin:0;background:#f3f4f6}",
        "header{background:#1d4ed8;color:#fff;padding:24px 48px}",
        "main{max-width:80rem;margin:24px auto;padding:0 48px}",
        ".field{display:inline-block;margin-right:24px}",
        ".field-error{margin-left:8px;padding:2px 6px;color:#fff;background:#ef4444;border-radius:6px;font-size:12px}",
        ".api-error{margin-top:24px;padding:24px;color:#dc2626;background:#fee2e2;border-radius:6px}",
        ".group{margin:8px 0 24px;background:#fff;border-radius:8px;box-shadow:0 1px 2px #3b82f6}",
        ".group summary{padding:20px 16px;cursor:pointer;font-weight:500}",
        ".group .body{padding:12px 16px 16px}",
        ".rules{padding:16px;font-family:monospace;font-size:12px;background:#eff6ff;border-radius:6px}",
        ".member{font-size:12px;padding:4px 0}",
        ".member label{display:inline-block;width:8rem;overflow:hidden;white-space:nowrap;text-overflow:ellipsis;font-weight:500}",
        "</style>\n</head>\n<body>\n",
        "<header><h1>Policy Consolidation</h1></header>\n<main>\n",
    ));

    render_form(view, &mut html);

    if let Some(payload) = &view.api_error {
        html.push_str("<div class=\"api-error\"><strong>There was an error with the API:</strong>");
        html.push_str(&format!("<pre>{}</pre></div>\n", pretty_json(payload)));
    }

    if let Some(groups) = &view.groups {
        if groups.is_empty() {
            html.push_str("<p class=\"empty\">No applications with resolvable access policies.</p>\n");
        }
        for (fingerprint, members) in groups.iter() {
            render_group(fingerprint, members, &mut html);
        }
    }

    html.push_str("</main>\n</body>\n</html>\n");
    html
}

fn render_form(view: &PageView, html: &mut String) {
    html.push_str("<form method=\"post\" action=\"/\">\n");
    render_field(
        html,
        "server",
        "Server",
        "text",
        &view.server,
        view.field_errors.server,
    );
    render_field(
        html,
        "api_key",
        "API Key",
        "password",
        &view.api_key,
        view.field_errors.api_key,
    );
    html.push_str("<button type=\"submit\">Get app list</button>\n</form>\n");
}

fn render_field(
    html: &mut String,
    name: &str,
    title: &str,
    input_type: &str,
    value: &str,
    error: Option<&str>,
) {
    html.push_str(&format!(
        "<div class=\"field\"><input id=\"{name}\" name=\"{name}\" type=\"{input_type}\" placeholder=\"{title}\" value=\"{}\">",
        escape_html(value)
    ));
    if let Some(error) = error {
        html.push_str(&format!(
            "<span class=\"field-error\">{}</span>",
            escape_html(error)
        ));
    }
    html.push_str("</div>\n");
}

fn render_group(
    fingerprint: &ContentFingerprint,
    members: &[AnnotatedApplication],
    html: &mut String,
) {
    let Some(first) = members.first() else {
        return;
    };

    html.push_str(&format!(
        "<details class=\"group\" id=\"group-{}\">\n<summary>{}</summary>\n<div class=\"body\">\n",
        fingerprint.short(),
        escape_html(&group_title(members))
    ));
    html.push_str("<h3>Exact policy contents:</h3>\n");
    html.push_str(&format!(
        "<pre class=\"rules\">{}</pre>\n",
        pretty_json(&first.rules)
    ));
    if members.len() > 1 {
        html.push_str(&format!("<h3>{} matching apps:</h3>\n", members.len()));
    }
    for member in members {
        let id = escape_html(&member.app.id);
        html.push_str(&format!(
            "<div class=\"member\"><input type=\"checkbox\" id=\"{id}\" name=\"{id}\"><label for=\"{id}\">{}</label> <span>{}</span></div>\n",
            escape_html(&member.app.name),
            escape_html(&member.app.label)
        ));
    }
    html.push_str("</div>\n</details>\n");
}

fn pretty_json(value: &Value) -> String {
    let rendered = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    escape_html(&rendered)
}

pub fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
