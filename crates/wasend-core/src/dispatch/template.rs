//! Template Renderer - Handles personalization of message content

use chrono::{DateTime, FixedOffset};
use regex::{Captures, Regex};
use std::sync::OnceLock;
use wasend_common::types::Contact;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_\-]+)?)\s*\}\}")
            .expect("placeholder pattern is valid")
    })
}

/// Template renderer for personalizing outbound messages
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    date_format: String,
    time_format: String,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new("%d/%m/%Y", "%H:%M")
    }
}

impl TemplateRenderer {
    /// Create a renderer with custom `{{date}}` and `{{time}}` formats
    pub fn new(date_format: impl Into<String>, time_format: impl Into<String>) -> Self {
        Self {
            date_format: date_format.into(),
            time_format: time_format.into(),
        }
    }

    /// Render a template for one recipient
    ///
    /// Unknown placeholders are kept verbatim.
    pub fn render(&self, template: &str, recipient: &Contact, now: DateTime<FixedOffset>) -> String {
        placeholder_regex()
            .replace_all(template, |caps: &Captures| {
                let key = &caps[1];
                self.resolve(key, recipient, now)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    fn resolve(&self, key: &str, recipient: &Contact, now: DateTime<FixedOffset>) -> Option<String> {
        if let Some(attr) = key.strip_prefix("attributes.") {
            return recipient.attributes.get(attr).cloned();
        }

        match key {
            "name" => Some(recipient.name.clone()),
            "first_name" => Some(recipient.first_name().to_string()),
            "last_name" => Some(recipient.last_name()),
            "phone" => Some(recipient.phone.clone()),
            "email" => recipient.email.clone(),
            "date" => Some(now.format(&self.date_format).to_string()),
            "time" => Some(now.format(&self.time_format).to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::west_opt(3 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 17, 14, 5, 0)
            .unwrap()
    }

    fn create_test_contact() -> Contact {
        Contact::new("João Pereira", "+55 21 98888-7777")
            .with_email("joao@example.com")
            .with_attribute("company", "Acme Ltda")
    }

    #[test]
    fn test_render_basic_template() {
        let renderer = TemplateRenderer::default();
        let result = renderer.render(
            "Olá {{name}}, seu número é {{phone}}",
            &create_test_contact(),
            now(),
        );
        assert_eq!(result, "Olá João Pereira, seu número é +55 21 98888-7777");
    }

    #[test]
    fn test_render_names_attributes_and_dates() {
        let renderer = TemplateRenderer::default();
        let result = renderer.render(
            "{{ first_name }} {{last_name}} da {{attributes.company}} em {{date}} às {{time}}",
            &create_test_contact(),
            now(),
        );
        assert_eq!(result, "João Pereira da Acme Ltda em 17/05/2024 às 14:05");
    }

    #[test]
    fn test_unresolved_placeholders_stay_literal() {
        let renderer = TemplateRenderer::default();
        let contact = Contact::new("Ana", "5511999990000");

        let result = renderer.render(
            "Hi {{name}}, {{unknown_var}} {{email}} {{attributes.plan}}",
            &contact,
            now(),
        );
        assert_eq!(result, "Hi Ana, {{unknown_var}} {{email}} {{attributes.plan}}");
    }

    #[test]
    fn test_plain_text_passes_through() {
        let renderer = TemplateRenderer::default();
        let text = "Promoção {válida} até amanhã!";
        assert_eq!(renderer.render(text, &create_test_contact(), now()), text);
    }
}
