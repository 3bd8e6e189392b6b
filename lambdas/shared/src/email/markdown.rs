//! Markdown email templates
//!
//! A template source is a markdown document. The first link reference
//! definition, e.g. `[subject]: # (Registration {{eventDate}})`, carries the
//! subject line in its title. Reference definitions produce no output, so the
//! subject never shows up in the bodies.
//!
//! Tables are used for label/value listings: the header row is dropped and
//! the first cell of a row is the label.

use handlebars::Handlebars;
use pulldown_cmark::{Alignment, BrokenLink, CowStr, Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{Error, Result};

/// SES template parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTemplate {
    #[serde(rename = "TemplateName")]
    pub name: String,
    #[serde(rename = "SubjectPart")]
    pub subject: String,
    #[serde(rename = "TextPart")]
    pub text: String,
    #[serde(rename = "HtmlPart")]
    pub html: String,
}

impl EmailTemplate {
    /// Compile the subject and text parts as Handlebars, as SES will
    pub fn validate(&self) -> Result<()> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(true);
        for (part, source) in [("subject", &self.subject), ("text", &self.text)] {
            registry
                .register_template_string(part, source)
                .map_err(|e| Error::Validation(format!("{} {}: {}", self.name, part, e)))?;
        }
        Ok(())
    }
}

fn warn_broken_link<'a>(link: BrokenLink<'a>) -> Option<(CowStr<'a>, CowStr<'a>)> {
    warn!(reference = %link.reference, span = ?link.span, "Unresolved link reference in template");
    None
}

/// Parse the source, returning the subject and the body events
fn parse(source: &str) -> (String, Vec<Event<'_>>) {
    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH;
    let parser = Parser::new_with_broken_link_callback(source, options, Some(warn_broken_link));

    let subject = parser
        .reference_definitions()
        .iter()
        .min_by_key(|(_, def)| def.span.start)
        .and_then(|(_, def)| def.title.as_ref())
        .map(|title| title.to_string())
        .unwrap_or_default();

    (subject, parser.collect())
}

pub fn markdown_to_template(name: &str, source: &str) -> EmailTemplate {
    let (subject, events) = parse(source);
    EmailTemplate {
        name: name.to_string(),
        subject,
        text: render_text(&events),
        html: render_html(events),
    }
}

pub fn markdown_to_text(source: &str) -> String {
    render_text(&parse(source).1)
}

pub fn markdown_to_html(source: &str) -> String {
    render_html(parse(source).1)
}

fn render_text(events: &[Event<'_>]) -> String {
    let mut out = String::new();
    let mut in_head = false;
    let mut cell: Option<String> = None;
    let mut link_dest: Vec<String> = Vec::new();

    for event in events {
        if in_head {
            if matches!(event, Event::End(TagEnd::TableHead)) {
                in_head = false;
            }
            continue;
        }

        match event {
            Event::Start(Tag::TableHead) => in_head = true,
            Event::Start(Tag::TableCell) => cell = Some(String::new()),
            Event::End(TagEnd::TableCell) => {
                if let Some(text) = cell.take() {
                    out.push_str(&text);
                    if text.ends_with(':') {
                        out.push(' ');
                    }
                }
            }
            Event::End(TagEnd::TableRow) | Event::End(TagEnd::Table) => out.push('\n'),
            Event::Start(Tag::Link { dest_url, .. }) => link_dest.push(dest_url.to_string()),
            Event::End(TagEnd::Link) => {
                if let Some(dest) = link_dest.pop() {
                    let target = sink(&mut cell, &mut out);
                    target.push_str(": ");
                    target.push_str(&dest);
                }
            }
            Event::End(TagEnd::Paragraph) | Event::End(TagEnd::Heading(_)) => out.push_str("\n\n"),
            Event::End(TagEnd::Item) | Event::Rule => out.push('\n'),
            Event::End(TagEnd::List(_)) => out.push('\n'),
            Event::Text(text) | Event::Code(text) => sink(&mut cell, &mut out).push_str(text),
            Event::SoftBreak | Event::HardBreak => sink(&mut cell, &mut out).push('\n'),
            _ => {}
        }
    }

    let mut text = out.trim_end().to_string();
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

/// Text inside a table cell is buffered until the cell ends
fn sink<'a>(cell: &'a mut Option<String>, out: &'a mut String) -> &'a mut String {
    match cell {
        Some(text) => text,
        None => out,
    }
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn align_attr(alignment: Option<&Alignment>) -> &'static str {
    match alignment {
        Some(Alignment::Left) => r#" align="left""#,
        Some(Alignment::Center) => r#" align="center""#,
        Some(Alignment::Right) => r#" align="right""#,
        Some(Alignment::None) | None => "",
    }
}

fn render_html(events: Vec<Event<'_>>) -> String {
    let mut transformed: Vec<Event<'_>> = Vec::with_capacity(events.len());
    let mut alignments: Vec<Alignment> = Vec::new();
    let mut in_head = false;
    let mut tbody_open = false;
    let mut cell_index = 0usize;

    for event in events {
        if in_head {
            if matches!(event, Event::End(TagEnd::TableHead)) {
                in_head = false;
            }
            continue;
        }

        match event {
            Event::SoftBreak => transformed.push(Event::HardBreak),
            Event::Start(Tag::Link { dest_url, title, .. }) => {
                let title = if title.is_empty() {
                    String::new()
                } else {
                    format!(r#" title="{}""#, escape_attr(&title))
                };
                transformed.push(Event::InlineHtml(
                    format!(r#"<a href="{}"{} target="_blank">"#, escape_attr(&dest_url), title).into(),
                ));
            }
            Event::End(TagEnd::Link) => transformed.push(Event::InlineHtml("</a>".into())),
            Event::Start(Tag::Table(align)) => {
                alignments = align;
                tbody_open = false;
                transformed.push(Event::Html("<table>\n".into()));
            }
            Event::Start(Tag::TableHead) => in_head = true,
            Event::Start(Tag::TableRow) => {
                if !tbody_open {
                    tbody_open = true;
                    transformed.push(Event::Html("<tbody>\n".into()));
                }
                cell_index = 0;
                transformed.push(Event::Html("<tr>\n".into()));
            }
            Event::Start(Tag::TableCell) => {
                let name = if cell_index == 0 { "th" } else { "td" };
                transformed.push(Event::Html(
                    format!("<{}{}>", name, align_attr(alignments.get(cell_index))).into(),
                ));
            }
            Event::End(TagEnd::TableCell) => {
                let name = if cell_index == 0 { "th" } else { "td" };
                if cell_index == 0 {
                    strip_label_colon(&mut transformed);
                }
                cell_index += 1;
                transformed.push(Event::Html(format!("</{}>\n", name).into()));
            }
            Event::End(TagEnd::TableRow) => transformed.push(Event::Html("</tr>\n".into())),
            Event::End(TagEnd::Table) => {
                if tbody_open {
                    transformed.push(Event::Html("</tbody>\n".into()));
                }
                transformed.push(Event::Html("</table>\n".into()));
            }
            other => transformed.push(other),
        }
    }

    let mut html = String::new();
    pulldown_cmark::html::push_html(&mut html, transformed.into_iter());
    html
}

/// Drop the trailing `:` of a row label
fn strip_label_colon(events: &mut [Event<'_>]) {
    if let Some(Event::Text(text)) = events.last_mut() {
        if let Some(stripped) = text.strip_suffix(':') {
            *text = CowStr::from(stripped.trim_end().to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE_TEMPLATE: &str = "\
[subject]: # (Ilmoittautuminen: {{reg.eventType}} {{eventDate}})

# {{title}}

[Muokkaa ilmoittautumista]({{link}}/edit)

table header | is removed
:-- | ----
Koe :| {{reg.eventType}} {{eventDate}}
Luokka :| {{reg.class}}

Ystävällisin terveisin,
{{event.secretary.name}}
";

    #[test]
    fn test_handlebars_validation() {
        assert!(markdown_to_template("registration-fi", TABLE_TEMPLATE).validate().is_ok());

        let err = markdown_to_template("registration-fi", "Hei {{#each dates}}{{date}}")
            .validate()
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("registration-fi text"));

        let err = markdown_to_template("x", "[subject]: # (Koe {{eventDate)\n\nBody").validate().unwrap_err();
        assert!(err.to_string().contains("x subject"));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(
            markdown_to_template("testTemplateName", ""),
            EmailTemplate {
                name: "testTemplateName".into(),
                subject: String::new(),
                text: String::new(),
                html: String::new(),
            }
        );
    }

    #[test]
    fn test_subject_is_extracted() {
        let template = markdown_to_template("testTemplateName", "[subject]: # (test)\n# content");
        assert_eq!(template.subject, "test");
        assert_eq!(template.text, "content\n");
        assert_eq!(template.html, "<h1>content</h1>\n");
    }

    #[test]
    fn test_first_definition_wins() {
        let source = "[subject]: # (Subject X)\n[other]: # (Other)\n\nHello";
        let template = markdown_to_template("t", source);
        assert_eq!(template.subject, "Subject X");
        assert!(!template.text.contains("Subject X"));
        assert!(!template.html.contains("Subject X"));
        assert!(!template.html.contains("subject"));
    }

    #[test]
    fn test_text_rendering() {
        let text = markdown_to_text(TABLE_TEMPLATE);
        assert_eq!(
            text,
            "{{title}}\n\n\
             Muokkaa ilmoittautumista: {{link}}/edit\n\n\
             Koe : {{reg.eventType}} {{eventDate}}\n\
             Luokka : {{reg.class}}\n\
             \n\
             Ystävällisin terveisin,\n\
             {{event.secretary.name}}\n"
        );
        assert!(!text.contains("table header"));
    }

    #[test]
    fn test_html_rendering() {
        let html = markdown_to_html(TABLE_TEMPLATE);
        assert!(html.contains("<h1>{{title}}</h1>"));
        assert!(html.contains(r#"<a href="{{link}}/edit" target="_blank">Muokkaa ilmoittautumista</a>"#));
        assert!(!html.contains("<thead>"));
        assert!(!html.contains("table header"));
        assert!(html.contains("<tbody>"));
        assert!(html.contains(r#"<th align="left">Koe</th>"#));
        assert!(html.contains("<td>{{reg.eventType}} {{eventDate}}</td>"));
        assert!(html.contains("Ystävällisin terveisin,<br />"));
    }

    #[test]
    fn test_table_without_body_rows() {
        let html = markdown_to_html("a | b\n--|--\n");
        assert!(!html.contains("<tbody>"));
        assert!(html.contains("<table>"));
    }

    #[test]
    fn test_broken_reference_is_not_fatal() {
        let text = markdown_to_text("See [missing] for details");
        assert_eq!(text, "See [missing] for details\n");
    }

    #[test]
    fn test_ses_part_names() {
        let template = markdown_to_template("registration-fi", "[s]: # (Hi)\nBody");
        let value = serde_json::to_value(&template).unwrap();
        assert_eq!(value["TemplateName"], "registration-fi");
        assert_eq!(value["SubjectPart"], "Hi");
        assert_eq!(value["TextPart"], "Body\n");
        assert_eq!(value["HtmlPart"], "<p>Body</p>\n");
    }
}
