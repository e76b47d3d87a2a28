//! Client resolution and per-client profiles.
//!
//! Each inbound call is mapped to a client id (explicit override, SIP header
//! tag, destination number, caller number, then the default) and the
//! client's profile — audio directory, operator routing, template and
//! keyword overrides — is loaded from `<clients_root>/<client_id>/config/`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use libertycall_dialogue::engine::EngineConfig;
use libertycall_dialogue::templates::TemplateRegistry;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::GatewayError;

/// SIP header carrying an explicit client tag.
pub const CLIENT_SIP_HEADER: &str = "X-LC-Client";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PhoneMapping {
    pub destination_numbers: HashMap<String, String>,
    pub caller_numbers: HashMap<String, String>,
    /// Legacy flat form: destination number → client id.
    #[serde(flatten)]
    pub flat: HashMap<String, String>,
}

impl PhoneMapping {
    pub fn load(config_root: &Path) -> Self {
        let path = config_root.join("phone_mapping.json");
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<PhoneMapping>(&raw) {
                Ok(mapping) => mapping,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "phone mapping unparsable, using empty");
                    PhoneMapping::default()
                }
            },
            Err(_) => PhoneMapping::default(),
        }
    }

    fn lookup_destination(&self, number: &str) -> Option<&String> {
        self.destination_numbers
            .get(number)
            .or_else(|| self.flat.get(number))
    }
}

/// Resolves the client id for a call.
pub fn resolve_client_id(
    mapping: &PhoneMapping,
    explicit: Option<&str>,
    sip_headers: Option<&HashMap<String, String>>,
    destination_number: Option<&str>,
    caller_number: Option<&str>,
    fallback: &str,
) -> String {
    if let Some(explicit) = explicit
        && !explicit.is_empty()
    {
        return explicit.to_string();
    }
    if let Some(headers) = sip_headers
        && let Some(tag) = headers.get(CLIENT_SIP_HEADER)
        && !tag.is_empty()
    {
        return tag.clone();
    }
    if let Some(dest) = destination_number
        && let Some(client) = mapping.lookup_destination(dest)
    {
        return client.clone();
    }
    if let Some(caller) = caller_number
        && let Some(client) = mapping.caller_numbers.get(caller)
    {
        return client.clone();
    }
    fallback.to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ClientConfigFile {
    client_name: Option<String>,
    transfer_number: Option<String>,
    caller_id_number: Option<String>,
    caller_id_name: Option<String>,
    save_calls: Option<bool>,
    entry_trigger_keywords: Option<Vec<String>>,
    closing_yes_keywords: Option<Vec<String>>,
    closing_no_keywords: Option<Vec<String>>,
    after_085_negative_keywords: Option<Vec<String>>,
}

/// Everything call handling needs to know about one client.
#[derive(Debug, Clone)]
pub struct ClientProfile {
    pub client_id: String,
    pub client_name: String,
    pub audio_dir: PathBuf,
    pub transfer_number: Option<String>,
    pub caller_id_number: Option<String>,
    pub caller_id_name: Option<String>,
    pub save_calls: bool,
    pub templates: TemplateRegistry,
    pub engine_config: EngineConfig,
}

impl ClientProfile {
    /// Loads a profile; missing files degrade to the built-in defaults so a
    /// misconfigured client still answers calls.
    pub fn load(clients_root: &Path, client_id: &str) -> Result<Self, GatewayError> {
        let base = clients_root.join(client_id);
        let config_path = base.join("config").join("client.json");

        let file: ClientConfigFile = match std::fs::read_to_string(&config_path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                GatewayError::ClientProfile(format!(
                    "invalid {}: {e}",
                    config_path.display()
                ))
            })?,
            Err(_) => {
                info!(client_id, "no client config file, using defaults");
                ClientConfigFile::default()
            }
        };

        let templates = TemplateRegistry::load_for_client(clients_root, client_id)
            .unwrap_or_else(|e| {
                warn!(client_id, error = %e, "template overrides rejected, using system defaults");
                TemplateRegistry::system_default()
            });

        let mut engine_config = EngineConfig::default();
        if let Some(list) = file.entry_trigger_keywords {
            engine_config.entry_trigger_keywords = list;
        }
        if let Some(list) = file.closing_yes_keywords {
            engine_config.closing_yes_keywords = list;
        }
        if let Some(list) = file.closing_no_keywords {
            engine_config.closing_no_keywords = list;
        }
        if let Some(list) = file.after_085_negative_keywords {
            engine_config.after_085_negative_keywords = list;
        }

        Ok(Self {
            client_id: client_id.to_string(),
            client_name: file.client_name.unwrap_or_else(|| "Default".to_string()),
            audio_dir: base.join("audio"),
            transfer_number: file.transfer_number,
            caller_id_number: file.caller_id_number,
            caller_id_name: file.caller_id_name,
            save_calls: file.save_calls.unwrap_or(true),
            templates,
            engine_config,
        })
    }

    /// Pure-default profile for when the on-disk config is unusable.
    pub fn fallback(clients_root: &Path, client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_name: "Default".to_string(),
            audio_dir: clients_root.join(client_id).join("audio"),
            transfer_number: None,
            caller_id_number: None,
            caller_id_name: None,
            save_calls: true,
            templates: TemplateRegistry::system_default(),
            engine_config: EngineConfig::default(),
        }
    }

    pub fn operator_available(&self) -> bool {
        self.transfer_number
            .as_deref()
            .is_some_and(|n| !n.is_empty())
    }
}
