use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::objects::api_object_type;
use crate::error::AppError;

/// A property definition from `GET /crm/v3/properties/{objectType}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDefinition {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub property_type: String,
    #[serde(default)]
    pub modification_metadata: Option<ModificationMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModificationMetadata {
    #[serde(default)]
    pub read_only_value: Option<bool>,
}

impl PropertyDefinition {
    pub fn is_date(&self) -> bool {
        matches!(self.property_type.as_str(), "date" | "datetime")
    }

    /// True only when HubSpot explicitly marks the value writable.
    pub fn is_writable(&self) -> bool {
        self.modification_metadata
            .as_ref()
            .and_then(|m| m.read_only_value)
            == Some(false)
    }

    pub fn display_label(&self) -> &str {
        self.label
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or(&self.name)
    }
}

/// One entry of a workflow field-options response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyOption {
    pub label: String,
    pub value: String,
}

impl From<&PropertyDefinition> for PropertyOption {
    fn from(p: &PropertyDefinition) -> Self {
        Self {
            label: p.display_label().to_string(),
            value: p.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactName {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
}

#[derive(Deserialize)]
struct PropertiesPage {
    #[serde(default)]
    results: Vec<PropertyDefinition>,
}

/// Thin client over the HubSpot CRM REST API. Every call takes the access
/// token of the portal it acts for.
#[derive(Clone)]
pub struct CrmClient {
    api_base: String,
    http: reqwest::Client,
}

impl CrmClient {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Current value of one property on a CRM object. `None` when unset.
    pub async fn fetch_property(
        &self,
        access_token: &str,
        object_type: &str,
        object_id: &str,
        property: &str,
    ) -> Result<Option<String>, AppError> {
        let resp = self
            .http
            .get(format!(
                "{}/crm/v3/objects/{}/{object_id}",
                self.api_base,
                api_object_type(object_type)
            ))
            .query(&[("properties", property)])
            .bearer_auth(access_token)
            .send()
            .await?;
        let body = read_json(resp).await?;

        Ok(match body.get("properties").and_then(|p| p.get(property)) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        })
    }

    /// PATCH a single property; returns the updated object.
    pub async fn update_property(
        &self,
        access_token: &str,
        object_type: &str,
        object_id: &str,
        property: &str,
        value: &Value,
    ) -> Result<Value, AppError> {
        let resp = self
            .http
            .patch(format!(
                "{}/crm/v3/objects/{}/{object_id}",
                self.api_base,
                api_object_type(object_type)
            ))
            .bearer_auth(access_token)
            .json(&json!({ "properties": { property: value } }))
            .send()
            .await?;
        read_json(resp).await
    }

    pub async fn list_properties(
        &self,
        access_token: &str,
        object_type: &str,
    ) -> Result<Vec<PropertyDefinition>, AppError> {
        let resp = self
            .http
            .get(format!(
                "{}/crm/v3/properties/{}",
                self.api_base,
                api_object_type(object_type)
            ))
            .bearer_auth(access_token)
            .send()
            .await?;
        let body = read_json(resp).await?;

        let page: PropertiesPage = serde_json::from_value(body)
            .map_err(|e| AppError::Http(format!("Unexpected properties response: {e}")))?;
        Ok(page.results)
    }

    /// The portal (hub) id the access token belongs to.
    pub async fn portal_id(&self, access_token: &str) -> Result<String, AppError> {
        let resp = self
            .http
            .get(format!("{}/integrations/v1/me", self.api_base))
            .bearer_auth(access_token)
            .send()
            .await?;
        let body = read_json(resp).await?;

        match body.get("portalId") {
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
            _ => Err(AppError::Http("integrations/v1/me response had no portalId".into())),
        }
    }

    /// Name of the first contact in the portal, for the landing page.
    pub async fn first_contact(&self, access_token: &str) -> Result<Option<ContactName>, AppError> {
        let resp = self
            .http
            .get(format!("{}/contacts/v1/lists/all/contacts/all", self.api_base))
            .query(&[("count", "1")])
            .bearer_auth(access_token)
            .send()
            .await?;
        let body = read_json(resp).await?;

        let Some(contact) = body.pointer("/contacts/0") else {
            return Ok(None);
        };
        let field = |name: &str| {
            contact
                .pointer(&format!("/properties/{name}/value"))
                .and_then(Value::as_str)
                .map(String::from)
        };

        Ok(Some(ContactName {
            firstname: field("firstname"),
            lastname: field("lastname"),
        }))
    }
}

/// Parse a JSON body, turning any non-success status into [`AppError::Crm`].
async fn read_json(resp: reqwest::Response) -> Result<Value, AppError> {
    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        tracing::warn!("HubSpot API returned {status}: {text}");
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        return Err(AppError::Crm {
            status: status.as_u16(),
            body,
        });
    }

    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text)
        .map_err(|e| AppError::Http(format!("Invalid JSON from HubSpot: {e}")))
}
