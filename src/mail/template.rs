//! Email body rendering.
//!
//! Two templates: the fixed onboarding email and the branded wrapper for
//! generic notifications. Interpolation is plain string substitution; the
//! payload fields come from our own producers, not arbitrary user HTML.

use serde_json::{Map, Value};

use super::Email;
use crate::model::{GenericPayload, WelcomePayload};

/// Company identity substituted into templates.
#[derive(Debug, Clone)]
pub struct Branding {
    pub name: String,
    pub website: String,
    pub support_email: String,
}

impl Branding {
    pub fn new(frontend_url: impl Into<String>) -> Self {
        Self {
            name: "SafeSpace".to_string(),
            website: frontend_url.into(),
            support_email: "support@safespace.in".to_string(),
        }
    }
}

/// Render the fixed onboarding email for a new user.
pub fn welcome_email(payload: &WelcomePayload, branding: &Branding) -> Email {
    let html = format!(
        r#"<div style="font-family: 'Segoe UI', Roboto, sans-serif; max-width: 640px; margin: auto; border-radius: 10px; overflow: hidden; box-shadow: 0 4px 12px rgba(0,0,0,0.1);">
  <div style="background: linear-gradient(135deg, #0284c7, #0369a1); padding: 32px; text-align: center;">
    <h1 style="color: white; margin: 0; font-size: 24px;">🛡️ Welcome to {company}!</h1>
  </div>
  <div style="padding: 32px; background: #fff;">
    <h2 style="color: #1f2937; margin-top: 0;">Hello {name}!</h2>
    <p style="color: #4b5563; line-height: 1.6;">
      Thank you for joining {company} - your intelligent safety companion. You're now part of a community dedicated to staying informed and safe.
    </p>
    <div style="background: #f3f4f6; border-radius: 8px; padding: 24px; margin: 24px 0;">
      <h3 style="color: #1f2937; margin-top: 0;">🚀 Get Started:</h3>
      <ul style="color: #4b5563; margin: 0;">
        <li>Explore real-time threat intelligence</li>
        <li>Set up your location preferences</li>
        <li>Customize notification settings</li>
        <li>Save threats for later reference</li>
      </ul>
    </div>
    <div style="text-align: center; margin: 32px 0;">
      <a href="{website}/dashboard"
         style="background: #0284c7; color: white; padding: 12px 24px; text-decoration: none; border-radius: 6px; font-weight: 600;">
        Go to Dashboard
      </a>
    </div>
    <p style="color: #6b7280; font-size: 14px; margin-top: 32px;">
      Stay safe, stay informed!<br>
      The {company} Team
    </p>
  </div>
</div>"#,
        company = branding.name,
        name = payload.name,
        website = branding.website,
    );

    Email::html(
        &payload.email,
        format!(
            "Welcome to {} - Your Safety Journey Begins!",
            branding.name
        ),
        html,
    )
    .from_name(&branding.name)
}

/// Render a generic notification inside the branded wrapper.
///
/// `options.templateData` overrides the company defaults, matching the
/// producer-facing contract (e.g. a custom display name per campaign).
pub fn generic_email(payload: &GenericPayload, branding: &Branding) -> Email {
    let company = company_data(payload, branding);
    let name = str_field(&company, "name");

    let html = format!(
        r#"<div style="font-family: 'Segoe UI', Roboto, sans-serif; max-width: 640px; margin: auto; border-radius: 10px; overflow: hidden; box-shadow: 0 4px 12px rgba(0,0,0,0.1); border: 1px solid #e0e0e0;">
  <div style="background: linear-gradient(135deg, #0F172A, #1E293B); padding: 24px; text-align: center;">
    <h1 style="color: #fff; font-size: 20px; margin: 0;">{name}</h1>
    <p style="color: #94A3B8; margin: 8px 0 0 0;">Stay Aware. Stay Safe.</p>
  </div>
  <div style="padding: 32px; background: #fff;">
    {text}
  </div>
  <div style="background: #F8FAFC; padding: 20px; text-align: center; border-top: 1px solid #E2E8F0;">
    <p style="color: #64748B; font-size: 14px; margin: 0;">
      Best regards,<br>The {name} Team
    </p>
  </div>
</div>"#,
        name = name,
        text = payload.text,
    );

    Email::multipart(&payload.to, &payload.subject, &payload.text, html).from_name(name)
}

/// Company defaults with caller-supplied templateData merged over them.
fn company_data(payload: &GenericPayload, branding: &Branding) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("name".to_string(), Value::String(branding.name.clone()));
    data.insert(
        "website".to_string(),
        Value::String(branding.website.clone()),
    );
    data.insert(
        "supportEmail".to_string(),
        Value::String(branding.support_email.clone()),
    );

    if let Some(overrides) = payload
        .options
        .as_ref()
        .and_then(|o| o.template_data.as_ref())
    {
        for (key, value) in overrides {
            data.insert(key.clone(), value.clone());
        }
    }

    data
}

fn str_field<'a>(data: &'a Map<String, Value>, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or("SafeSpace")
}
