//! Server-rendered HTML for the research form.

use comrak::{Options, markdown_to_html};
use researchcrew_core::MAX_TOPIC_CHARS;

const STYLE: &str = "body{font-family:system-ui,sans-serif;max-width:52rem;margin:2rem auto;padding:0 1rem;line-height:1.5}\
textarea{width:100%;font:inherit}\
.notice{padding:.75rem 1rem;border-left:4px solid #c0392b;background:#fbeeee}\
.report{border-top:1px solid #ddd;margin-top:1.5rem}\
pre{overflow-x:auto;background:#f6f6f6;padding:.5rem}";

/// A rendered research result.
pub struct ReportView<'a> {
    pub topic: &'a str,
    pub markdown: &'a str,
    pub elapsed_secs: f64,
    /// File name under the reports directory, when the report was saved.
    pub file_name: Option<&'a str>,
    /// Shown above the report, e.g. when saving failed or tasks were skipped.
    pub notices: Vec<String>,
}

pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Render report Markdown to HTML. Raw HTML inside the Markdown is not passed through.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::default();
    options.extension.table = true;
    options.extension.strikethrough = true;
    options.extension.autolink = true;
    markdown_to_html(markdown, &options)
}

pub fn download_href(file_name: &str) -> String {
    format!("/reports/{}", urlencoding::encode(file_name))
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
<title>{title}</title>\n<style>{STYLE}</style>\n</head>\n<body>\n{body}\n</body>\n</html>\n",
        title = escape_html(title),
    )
}

fn topic_form(prefill: &str) -> String {
    format!(
        "<form method=\"post\" action=\"/research\">\n\
<label for=\"topic\">Research topic</label>\n\
<textarea id=\"topic\" name=\"topic\" rows=\"3\" maxlength=\"{MAX_TOPIC_CHARS}\" required>{}</textarea>\n\
<button type=\"submit\">Generate report</button>\n</form>",
        escape_html(prefill)
    )
}

pub fn index_page() -> String {
    let body = format!(
        "<h1>ResearchCrew</h1>\n<p>A manager, a researcher and an analyst agent plan the work, \
search the web and arXiv, and write a Markdown report. A run takes a few minutes.</p>\n{}",
        topic_form("")
    );
    layout("ResearchCrew", &body)
}

pub fn report_page(view: &ReportView<'_>) -> String {
    let mut body = format!(
        "<h1>{}</h1>\n<p>Generated in {:.1}s.",
        escape_html(view.topic),
        view.elapsed_secs
    );
    if let Some(name) = view.file_name {
        body.push_str(&format!(
            " <a href=\"{}\" download>Download Markdown</a>",
            escape_html(&download_href(name))
        ));
    }
    body.push_str("</p>\n");
    for notice in &view.notices {
        body.push_str(&format!("<p class=\"notice\">{}</p>\n", escape_html(notice)));
    }
    body.push_str(&format!(
        "<article class=\"report\">\n{}</article>\n<p><a href=\"/\">New research</a></p>",
        render_markdown(view.markdown)
    ));
    layout(view.topic, &body)
}

pub fn error_page(title: &str, message: &str) -> String {
    let body = format!(
        "<h1>{}</h1>\n<p class=\"notice\">{}</p>\n{}",
        escape_html(title),
        escape_html(message),
        topic_form("")
    );
    layout(title, &body)
}
