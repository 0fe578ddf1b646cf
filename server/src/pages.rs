//! HTML pages served by the visualizer.
//!
//! Every value that came from a client is escaped. The engine's rendering is
//! embedded verbatim; it is produced by our own engine from numeric input.

use std::fmt::Write as _;

use crate::dispatcher::{RequestOrigin, Visualization};
use crate::params::{BuildMode, DEFAULT_FANOUT, DEFAULT_LEAF_SIZE, FANOUT_RANGE, LEAF_SIZE_RANGE};
use crate::samples::{DEFAULT_SAMPLE, SAMPLES};

const STYLE: &str = "body{font-family:sans-serif;margin:2em}\
fieldset{margin-bottom:1em}\
.error{color:#a00}\
.inserted{color:#060}";

/// Escape text for use in HTML content and quoted attribute values.
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{}</title>\
         <style>{STYLE}</style></head><body>\n<h1>{}</h1>\n{body}\n</body></html>\n",
        escape_html(title),
        escape_html(title)
    )
}

fn hidden(name: &str, value: &str) -> String {
    format!(
        "<input type=\"hidden\" name=\"{name}\" value=\"{}\">",
        escape_html(value)
    )
}

/// The start page: choose an input and tree parameters.
#[must_use]
pub fn start_page(max_upload_bytes: usize) -> String {
    let mut samples = String::new();
    for sample in SAMPLES {
        let selected = if sample.name == DEFAULT_SAMPLE {
            " selected"
        } else {
            ""
        };
        let _ = write!(
            samples,
            "<option value=\"{}\"{selected}>{} ({})</option>",
            sample.name, sample.name, sample.description
        );
    }

    let body = format!(
        "<form method=\"post\" action=\"/btree\" enctype=\"multipart/form-data\">\n\
         {from}\n\
         <fieldset><legend>Input</legend>\n\
         <p>Upload a file of whitespace-separated integers (at most {max_upload_bytes} bytes):\n\
         <input type=\"file\" name=\"ufile\"></p>\n\
         <p>or use a sample: <select name=\"sfile\">{samples}</select></p>\n\
         </fieldset>\n\
         <fieldset><legend>Tree</legend>\n\
         <p>Leaf size ({leaf_min}-{leaf_max}): <input type=\"text\" name=\"lns\" value=\"{DEFAULT_LEAF_SIZE}\"></p>\n\
         <p>Fanout ({fan_min}-{fan_max}): <input type=\"text\" name=\"fan\" value=\"{DEFAULT_FANOUT}\"></p>\n\
         <p><label><input type=\"radio\" name=\"blm\" value=\"i\" checked> insert one by one</label>\n\
         <label><input type=\"radio\" name=\"blm\" value=\"b\"> bulk load</label></p>\n\
         </fieldset>\n\
         <input type=\"submit\" value=\"Build tree\">\n\
         </form>",
        from = hidden("from", RequestOrigin::StartPage.form_value()),
        leaf_min = LEAF_SIZE_RANGE.start(),
        leaf_max = LEAF_SIZE_RANGE.end(),
        fan_min = FANOUT_RANGE.start(),
        fan_max = FANOUT_RANGE.end(),
    );
    page("B+-tree visualizer", &body)
}

/// The result page: the rendered tree and a form to insert more values.
#[must_use]
pub fn result_page(visualization: &Visualization) -> String {
    let parameters = &visualization.parameters;
    let mut body = String::new();

    let _ = write!(
        body,
        "<p>Session {}: leaf size {}, fanout {}, {}.</p>\n",
        visualization.session_id,
        parameters.leaf_size,
        parameters.fanout,
        match parameters.build_mode {
            BuildMode::Insert => "built by insertion",
            BuildMode::BulkLoad => "bulk loaded",
        }
    );
    if !visualization.inserted.is_empty() {
        let _ = write!(
            body,
            "<p class=\"inserted\">Inserted: {}</p>\n",
            escape_html(&visualization.inserted.join(" "))
        );
    }

    body.push_str(&visualization.html);

    let _ = write!(
        body,
        "\n<form method=\"post\" action=\"/btree\" enctype=\"multipart/form-data\">\n\
         {}{}{}{}{}{}\n\
         <p>Insert values: <input type=\"text\" name=\"ins\"> \
         <input type=\"submit\" value=\"Insert\"></p>\n\
         </form>\n\
         <p><a href=\"/\">Build a new tree</a></p>",
        hidden("from", RequestOrigin::VisualizePage.form_value()),
        hidden("token", &visualization.token),
        hidden("btn", &visualization.session_id.to_string()),
        hidden("lns", &parameters.leaf_size.to_string()),
        hidden("fan", &parameters.fanout.to_string()),
        hidden("blm", parameters.build_mode.form_value()),
    );
    page("B+-tree visualizer", &body)
}

/// A page explaining why a request failed.
#[must_use]
pub fn error_page(message: &str) -> String {
    let body = format!(
        "<p class=\"error\">{}</p>\n<p><a href=\"/\">Back to the start page</a></p>",
        escape_html(message)
    );
    page("B+-tree visualizer", &body)
}
