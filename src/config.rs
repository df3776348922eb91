use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Main configuration structure for the accounting assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
    pub voice: VoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    pub chat_path: String,
    pub voice_path: String,
}

/// OpenAI-compatible chat-completions gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub url: String,
    pub api_key: String,
    pub model: String,
}

/// Hosted database / auth service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_voice_id: String,
    pub stt_model: String,
    pub tts_model: String,
    /// Fixed transcription language
    pub language_code: String,
}

impl Config {
    /// Load configuration from file with environment variable overrides
    /// ALWAYS returns a valid config - never fails
    pub fn load() -> Self {
        let env_paths = ["../.env", ".env"];

        let mut env_loaded = false;
        for path in &env_paths {
            if dotenvy::from_path(path).is_ok() {
                tracing::info!("Loaded .env from: {}", path);
                env_loaded = true;
                break;
            }
        }

        if !env_loaded {
            tracing::warn!(
                "No .env file found in any expected location - continuing with env vars only"
            );
        }

        let config_path =
            env::var("ASSISTANT_CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            match fs::read_to_string(&config_path) {
                Ok(contents) => match serde_yaml::from_str::<Config>(&contents) {
                    Ok(config) => {
                        tracing::info!("Loaded configuration from {}", config_path);
                        config
                    }
                    Err(e) => {
                        tracing::error!(
                            "Failed to parse config file {}: {} - using defaults",
                            config_path,
                            e
                        );
                        Self::default()
                    }
                },
                Err(e) => {
                    tracing::error!(
                        "Failed to read config file {}: {} - using defaults",
                        config_path,
                        e
                    );
                    Self::default()
                }
            }
        } else {
            tracing::warn!("Config file not found at {} - using defaults", config_path);
            Self::default()
        };

        config.apply_env_overrides();

        if let Err(e) = config.validate() {
            tracing::warn!("Config validation warnings: {} - continuing anyway", e);
        }

        config
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Applies overrides from any key lookup; split out so tests need not touch the process env
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Server overrides
        if let Some(bind) = lookup("ASSISTANT_HTTP_BIND") {
            self.server.bind = bind;
        }
        if let Some(path) = lookup("ASSISTANT_CHAT_PATH") {
            self.server.chat_path = path;
        }
        if let Some(path) = lookup("ASSISTANT_VOICE_PATH") {
            self.server.voice_path = path;
        }

        // Gateway overrides
        if let Some(url) = lookup("AI_GATEWAY_URL") {
            self.gateway.url = url;
        }
        if let Some(api_key) = lookup("AI_GATEWAY_API_KEY") {
            self.gateway.api_key = api_key;
        }
        if let Some(model) = lookup("AI_MODEL") {
            self.gateway.model = model;
        }

        // Store overrides; the service-role key wins over the anon key
        if let Some(url) = lookup("SUPABASE_URL") {
            self.store.url = url;
        }
        if let Some(key) = lookup("SUPABASE_ANON_KEY") {
            self.store.api_key = key;
        }
        if let Some(key) = lookup("SUPABASE_SERVICE_ROLE_KEY") {
            self.store.api_key = key;
        }

        // Voice overrides
        if let Some(api_key) = lookup("ELEVENLABS_API_KEY") {
            self.voice.api_key = api_key;
        }
        if let Some(voice_id) = lookup("ELEVENLABS_VOICE_ID") {
            self.voice.default_voice_id = voice_id;
        }
        if let Some(language) = lookup("ELEVENLABS_LANGUAGE") {
            self.voice.language_code = language;
        }

        // Routes from any layer must be absolute for the router
        self.server.chat_path = absolute_path(&self.server.chat_path);
        self.server.voice_path = absolute_path(&self.server.voice_path);
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address '{}'", self.server.bind).into());
        }
        if !self.server.chat_path.starts_with('/') || !self.server.voice_path.starts_with('/') {
            return Err("Route paths must start with '/'".into());
        }
        if self.gateway.api_key.is_empty() {
            return Err("AI_GATEWAY_API_KEY environment variable must be set".into());
        }
        if self.store.url.is_empty() || self.store.api_key.is_empty() {
            return Err("SUPABASE_URL and SUPABASE_ANON_KEY must be set".into());
        }
        if self.voice.api_key.is_empty() {
            return Err("ELEVENLABS_API_KEY not set - voice endpoints will fail".into());
        }
        Ok(())
    }
}

fn absolute_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind: "127.0.0.1:8787".to_string(),
                chat_path: "/agent-chat".to_string(),
                voice_path: "/voice".to_string(),
            },
            gateway: GatewayConfig {
                url: "https://ai.gateway.lovable.dev/v1/chat/completions".to_string(),
                api_key: String::new(),
                model: "google/gemini-2.5-flash".to_string(),
            },
            store: StoreConfig {
                url: String::new(),
                api_key: String::new(),
            },
            voice: VoiceConfig {
                api_key: String::new(),
                base_url: "https://api.elevenlabs.io/v1".to_string(),
                default_voice_id: "EXAVITQu4vr4xnSDxMaL".to_string(),
                stt_model: "scribe_v1".to_string(),
                tts_model: "eleven_multilingual_v2".to_string(),
                language_code: "spa".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("ASSISTANT_HTTP_BIND", "0.0.0.0:9000"),
            ("AI_MODEL", "openai/gpt-5-mini"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service"),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.server.bind, "0.0.0.0:9000");
        assert_eq!(cfg.gateway.model, "openai/gpt-5-mini");
        assert_eq!(cfg.store.api_key, "service");
        assert_eq!(cfg.voice.language_code, "spa");
    }

    #[test]
    fn test_relative_route_paths_are_made_absolute() {
        let mut cfg = Config::default();
        cfg.server.voice_path = "functions/v1/voice".into();
        cfg.apply_overrides(|k| (k == "ASSISTANT_CHAT_PATH").then(|| "agent-chat".to_string()));
        assert_eq!(cfg.server.chat_path, "/agent-chat");
        assert_eq!(cfg.server.voice_path, "/functions/v1/voice");
    }

    #[test]
    fn test_validate_flags_missing_keys() {
        let cfg = Config::default();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.gateway.api_key = "k".into();
        cfg.store.url = "https://example.supabase.co".into();
        cfg.store.api_key = "anon".into();
        cfg.voice.api_key = "v".into();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_yaml_file_shape() {
        let yaml = r#"
server:
  bind: "0.0.0.0:8080"
  chat_path: /functions/v1/agent-chat
  voice_path: /functions/v1/voice
gateway:
  url: https://gateway.example/v1/chat/completions
  api_key: ""
  model: google/gemini-2.5-flash
store:
  url: https://project.supabase.co
  api_key: anon
voice:
  api_key: ""
  base_url: https://api.elevenlabs.io/v1
  default_voice_id: voice-1
  stt_model: scribe_v1
  tts_model: eleven_multilingual_v2
  language_code: spa
"#;
        let parsed: Config = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(parsed.server.chat_path, "/functions/v1/agent-chat");
        assert_eq!(parsed.store.url, "https://project.supabase.co");
        assert_eq!(parsed.voice.default_voice_id, "voice-1");
    }
}
