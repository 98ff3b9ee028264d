//! Email template rendering.
//!
//! Templates are Handlebars, compiled once at construction. HTML templates
//! escape every interpolated value; plain-text templates use triple braces.

use crate::error::{NotificationError, NotificationResult};
use handlebars::Handlebars;
use serde_json::Value;
use tracing::debug;

pub const EMAIL_VERIFICATION: &str = "email_verification";
pub const EMAIL_VERIFICATION_TEXT: &str = "email_verification_text";
pub const DONATION_RECEIPT: &str = "donation_receipt";
pub const DONATION_RECEIPT_TEXT: &str = "donation_receipt_text";

/// Renders a named template against a JSON context.
#[cfg_attr(test, mockall::automock)]
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template_name: &str, context: &Value) -> NotificationResult<String>;
}

/// Handlebars-backed [`TemplateRenderer`] with the notification templates registered.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    /// Create a new template engine with all templates registered.
    pub fn new() -> NotificationResult<Self> {
        let mut handlebars = Handlebars::new();

        for (name, source) in [
            (EMAIL_VERIFICATION, EMAIL_VERIFICATION_HTML_TEMPLATE),
            (EMAIL_VERIFICATION_TEXT, EMAIL_VERIFICATION_TEXT_TEMPLATE),
            (DONATION_RECEIPT, DONATION_RECEIPT_HTML_TEMPLATE),
            (DONATION_RECEIPT_TEXT, DONATION_RECEIPT_TEXT_TEMPLATE),
        ] {
            handlebars
                .register_template_string(name, source)
                .map_err(|e| {
                    NotificationError::TemplateError(format!("Failed to register {}: {}", name, e))
                })?;
        }

        Ok(Self { handlebars })
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.handlebars.has_template(name)
    }
}

impl TemplateRenderer for TemplateEngine {
    fn render(&self, template_name: &str, context: &Value) -> NotificationResult<String> {
        debug!(template = %template_name, "Rendering template");
        Ok(self.handlebars.render(template_name, context)?)
    }
}

// ============================================================================
// Templates
// ============================================================================

const EMAIL_VERIFICATION_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Verify your email address</title>
</head>
<body style="font-family: Arial, sans-serif; background: #f4f6f8; margin: 0; padding: 24px;">
  <table role="presentation" width="100%" style="max-width: 560px; margin: 0 auto; background: #ffffff; border-radius: 8px; padding: 32px;">
    {{#if logo_url}}
    <tr><td style="text-align: center; padding-bottom: 24px;"><img src="{{logo_url}}" alt="{{brand_name}}" height="48"></td></tr>
    {{/if}}
    <tr><td>
      <h1 style="font-size: 22px; color: #1f2933;">Hi {{user.name}},</h1>
      <p style="color: #3e4c59; line-height: 1.5;">
        Thanks for signing up with {{brand_name}}. Please confirm your email address so we can keep your account secure.
      </p>
      <p style="text-align: center; margin: 32px 0;">
        <a href="{{verification_url}}" style="background: #0b7a75; color: #ffffff; padding: 12px 24px; border-radius: 4px; text-decoration: none;">Verify email</a>
      </p>
      <p style="color: #616e7c; font-size: 13px;">
        If the button does not work, paste this link into your browser:<br>
        <a href="{{verification_url}}">{{verification_url}}</a>
      </p>
      <p style="color: #616e7c; font-size: 13px;">
        Didn't create an account? You can ignore this email or contact <a href="mailto:{{support_email}}">{{support_email}}</a>.
      </p>
    </td></tr>
    <tr><td style="color: #9aa5b1; font-size: 12px; text-align: center; padding-top: 24px;">
      &copy; {{now_year}} {{brand_name}}
    </td></tr>
  </table>
</body>
</html>
"#;

const EMAIL_VERIFICATION_TEXT_TEMPLATE: &str = r#"Hi {{{user.name}}},

Thanks for signing up with {{{brand_name}}}. Confirm your email address by opening this link:

{{{verification_url}}}

Didn't create an account? Ignore this email or contact {{{support_email}}}.

(c) {{{now_year}}} {{{brand_name}}}
"#;

const DONATION_RECEIPT_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>Your donation receipt</title>
</head>
<body style="font-family: Arial, sans-serif; background: #f4f6f8; margin: 0; padding: 24px;">
  <table role="presentation" width="100%" style="max-width: 560px; margin: 0 auto; background: #ffffff; border-radius: 8px; padding: 32px;">
    <tr><td>
      <h1 style="font-size: 22px; color: #1f2933;">Thank you, {{donor.name}}!</h1>
      <p style="color: #3e4c59; line-height: 1.5;">
        We received your donation of <strong>{{amount}}</strong>{{#if campaign_title}} to <strong>{{campaign_title}}</strong>{{/if}}.
      </p>
      <p style="color: #616e7c; font-size: 13px;">
        Keep this email as your receipt. Questions? Write to <a href="mailto:{{support_email}}">{{support_email}}</a>.
      </p>
    </td></tr>
    <tr><td style="color: #9aa5b1; font-size: 12px; text-align: center; padding-top: 24px;">
      &copy; {{now_year}} {{brand_name}}
    </td></tr>
  </table>
</body>
</html>
"#;

const DONATION_RECEIPT_TEXT_TEMPLATE: &str = r#"Thank you, {{{donor.name}}}!

We received your donation of {{{amount}}}{{#if campaign_title}} to {{{campaign_title}}}{{/if}}.

Keep this email as your receipt. Questions? Write to {{{support_email}}}.

(c) {{{now_year}}} {{{brand_name}}}
"#;
