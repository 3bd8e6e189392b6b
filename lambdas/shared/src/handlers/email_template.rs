//! Email template administration
//!
//! Sources are markdown per language. Saving renders each language, checks
//! the Handlebars syntax of every rendering and pushes them to SES as
//! `{id}-{language}` before the sources are stored.

use serde_json::{Map, Value};
use tracing::info;

use super::{admin_user, body_object, instrumented, timestamp};
use crate::email::markdown_to_template;
use crate::errors::Error;
use crate::models::EmailTemplateSource;
use crate::request::ApiRequest;
use crate::response::ApiResponse;
use crate::services::Services;
use crate::store::{from_item, key};

/// `GET /admin/emailTemplate`
pub async fn get_email_templates(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("getEmailTemplates", request, async {
        admin_user(services, request).await?;
        let items = services.email_templates.read_all().await?;
        Ok(ApiResponse::ok(&items))
    })
    .await
}

/// `POST /admin/emailTemplate`
pub async fn put_email_template(services: &Services, request: &ApiRequest) -> ApiResponse {
    instrumented("putEmailTemplate", request, async {
        let user = admin_user(services, request).await?;
        let mut item = body_object(request)?;
        let source: EmailTemplateSource = from_item(item.clone()).map_err(|e| Error::Validation(e.to_string()))?;
        if source.id.is_empty() {
            return Err(Error::Validation("id is required".to_string()));
        }

        let mut templates = Vec::new();
        for (language, markdown) in source.sources() {
            let template = markdown_to_template(&format!("{}-{}", source.id, language), markdown);
            template.validate()?;
            templates.push((language, template));
        }

        let mut rendered = Map::new();
        for (language, template) in templates {
            services.mailer.put_template(&template).await?;
            info!(template = %template.name, "Email template updated");
            rendered.insert(language.to_string(), serde_json::to_value(&template)?);
        }
        item.insert("ses".to_string(), Value::Object(rendered));
        item.insert("modifiedAt".to_string(), Value::String(timestamp()));
        item.insert("modifiedBy".to_string(), Value::String(user.name));

        let mut data = services
            .email_templates
            .read(&key([("id", source.id.as_str())]))
            .await?
            .unwrap_or_default();
        data.extend(item);
        services.email_templates.write(&data).await?;

        Ok(ApiResponse::ok(&data))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingMailer, TestServices};
    use serde_json::json;

    fn services(mailer: RecordingMailer) -> TestServices {
        let t = TestServices::with_mailer(mailer);
        t.users.insert(json!({"id": "u1", "name": "Admin", "email": "admin@example.com", "admin": true}));
        t.email_templates.insert(json!({"id": "registration", "fi": "old", "note": "kept"}));
        t
    }

    fn put(body: Value) -> ApiRequest {
        ApiRequest::new("POST", "/admin/emailTemplate")
            .with_claims(json!({"email": "admin@example.com"}))
            .with_body(body.to_string())
    }

    #[tokio::test]
    async fn test_put_renders_each_language() {
        let t = services(RecordingMailer::new());
        let body = json!({
            "id": "registration",
            "fi": "[subject]: # (Ilmoittautuminen)\n# Hei {{reg.handler.name}}",
            "en": "[subject]: # (Registration)\nHello"
        });

        let res = put_email_template(&t.services, &put(body)).await;
        assert_eq!(res.status_code, 200);

        let mut names: Vec<String> = t.mailer.templates().into_iter().map(|t| t.name).collect();
        names.sort();
        assert_eq!(names, vec!["registration-en", "registration-fi"]);
        let fi = t.mailer.templates().into_iter().find(|t| t.name == "registration-fi").unwrap();
        assert_eq!(fi.subject, "Ilmoittautuminen");
        assert_eq!(fi.text, "Hei {{reg.handler.name}}\n");

        let stored = t.email_templates.get(&key([("id", "registration")])).unwrap();
        assert_eq!(stored["note"], "kept");
        assert_eq!(stored["modifiedBy"], "Admin");
        assert_eq!(stored["ses"]["en"]["SubjectPart"], "Registration");
    }

    #[tokio::test]
    async fn test_malformed_handlebars_is_rejected() {
        let t = services(RecordingMailer::new());
        let body = json!({
            "id": "registration",
            "fi": "[subject]: # (Ilmoittautuminen)\nHei {{reg.handler.name}}",
            "en": "[subject]: # (Registration)\nHello {{#if reg.owner}}owner"
        });

        let res = put_email_template(&t.services, &put(body)).await;
        assert_eq!(res.status_code, 400);
        assert_eq!(res.json().unwrap()["error"], "validation_error");
        assert!(t.mailer.templates().is_empty());
        assert_eq!(t.email_templates.call_count("write"), 0);

        let res = put_email_template(&t.services, &put(json!({"id": "registration", "fi": "Hei {{name"}))).await;
        assert_eq!(res.status_code, 400);
    }

    #[tokio::test]
    async fn test_ses_failure_stores_nothing() {
        let t = services(RecordingMailer::failing());

        let res = put_email_template(&t.services, &put(json!({"id": "registration", "fi": "x"}))).await;
        assert_eq!(res.status_code, 501);
        assert_eq!(t.email_templates.call_count("write"), 0);
    }

    #[tokio::test]
    async fn test_list_requires_admin() {
        let t = services(RecordingMailer::new());

        let res = get_email_templates(&t.services, &ApiRequest::new("GET", "/admin/emailTemplate")).await;
        assert_eq!(res.status_code, 401);

        let request = ApiRequest::new("GET", "/admin/emailTemplate").with_claims(json!({"email": "admin@example.com"}));
        let res = get_email_templates(&t.services, &request).await;
        assert_eq!(res.json().unwrap().as_array().unwrap().len(), 1);
    }
}
