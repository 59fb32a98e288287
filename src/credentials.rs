use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::info;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use marketchat::session::{AuthError, SessionContext};

/// Session saved by `marketchat login`
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SavedSession {
    pub api_url: String,
    pub socket_url: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

impl SavedSession {
    pub fn new(api_url: &str, socket_url: &str, user_id: &str, display_name: Option<&str>, token: &str) -> Self {
        SavedSession {
            api_url: api_url.to_string(),
            socket_url: socket_url.to_string(),
            user_id: user_id.to_string(),
            display_name: display_name.map(str::to_string),
            token: Some(BASE64.encode(token)),
        }
    }

    pub fn get_token(&self) -> Option<String> {
        self.token.as_ref().and_then(|encoded| {
            BASE64
                .decode(encoded)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
    }

    pub fn to_session_context(&self) -> Result<SessionContext, AuthError> {
        let token = self.get_token().ok_or(AuthError::MissingCredential)?;
        let session = SessionContext::new(self.user_id.as_str(), token)?;
        Ok(match &self.display_name {
            Some(name) => session.with_display_name(name.clone()),
            None => session,
        })
    }
}

static CONFIG_DIR_OVERRIDE: OnceCell<PathBuf> = OnceCell::new();

pub fn set_config_dir_override(dir: PathBuf) {
    let _ = CONFIG_DIR_OVERRIDE.set(dir);
}

pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = match CONFIG_DIR_OVERRIDE.get() {
        Some(dir) => dir.clone(),
        None => dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?
            .join("marketchat"),
    };

    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

fn get_session_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("session.json"))
}

pub fn save_session(session: &SavedSession) -> Result<()> {
    save_session_to(&get_session_path()?, session)
}

pub fn load_session() -> Result<Option<SavedSession>> {
    load_session_from(&get_session_path()?)
}

pub fn clear_session() -> Result<bool> {
    let path = get_session_path()?;
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(&path)?;
    info!("Removed saved session at {}", path.display());
    Ok(true)
}

fn save_session_to(path: &Path, session: &SavedSession) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, session)?;

    info!("Session saved for {}", session.user_id);
    Ok(())
}

fn load_session_from(path: &Path) -> Result<Option<SavedSession>> {
    if !path.exists() {
        return Ok(None);
    }

    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    let session: SavedSession = serde_json::from_str(&contents)?;
    info!("Loaded session for {} from {}", session.user_id, path.display());

    Ok(Some(session))
}
