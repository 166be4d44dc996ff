// ============================================================
// Layer 6 — Model Acquisition
// ============================================================
// Two ways to get a model's files onto local disk:
//
//   HubSource   — Hugging Face hub via hf-hub (cached under
//                 ~/.cache/huggingface), authenticated with a token
//   LocalSource — a directory that already holds the files
//
// Either way the result is a ModelFiles:
//
//   config.json
//   tokenizer.json
//   model.safetensors   or   model.safetensors.index.json → shards
//
// Token resolution order: HF_TOKEN, HUGGING_FACE_HUB_TOKEN, then
// the token file written by `huggingface-cli login`.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use hf_hub::{
    api::sync::{Api, ApiBuilder, ApiError, ApiRepo},
    Cache, Repo, RepoType,
};
use serde::Deserialize;

use crate::domain::error::{FinetuneError, Result};
use crate::domain::traits::{ModelFiles, ModelSource};

pub const CONFIG_FILE:    &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const WEIGHTS_FILE:   &str = "model.safetensors";
pub const INDEX_FILE:     &str = "model.safetensors.index.json";

const TOKEN_VARS: [&str; 2] = ["HF_TOKEN", "HUGGING_FACE_HUB_TOKEN"];

// ─── Token ────────────────────────────────────────────────────────────────────

/// First non-blank of: the token env vars, the cached login token.
pub fn resolve_token() -> Option<String> {
    let from_env = TOKEN_VARS.iter().find_map(|var| std::env::var(var).ok());
    pick_token(from_env, Cache::default().token())
}

fn pick_token(from_env: Option<String>, cached: Option<String>) -> Option<String> {
    [from_env, cached]
        .into_iter()
        .flatten()
        .map(|t| t.trim().to_string())
        .find(|t| !t.is_empty())
}

// ─── Sharded checkpoints ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ShardIndex {
    weight_map: BTreeMap<String, String>,
}

/// Distinct shard file names listed in model.safetensors.index.json.
pub fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let text  = std::fs::read_to_string(index_path).map_err(|e| FinetuneError::io(index_path, e))?;
    let index: ShardIndex = serde_json::from_str(&text)
        .map_err(|e| FinetuneError::format(index_path.display().to_string(), e.to_string()))?;

    let names: BTreeSet<String> = index.weight_map.into_values().collect();
    if names.is_empty() {
        return Err(FinetuneError::format(index_path.display().to_string(), "weight_map is empty"));
    }
    Ok(names.into_iter().collect())
}

// ─── HubSource ────────────────────────────────────────────────────────────────

pub struct HubSource {
    api:      Api,
    revision: String,
}

impl HubSource {
    pub fn new(token: Option<String>, revision: impl Into<String>) -> Result<Self> {
        if token.is_none() {
            tracing::warn!("No Hugging Face token found; gated models such as Llama will be refused");
        }
        let api = ApiBuilder::new()
            .with_token(token)
            .with_progress(true)
            .build()
            .map_err(|e| FinetuneError::config(format!("cannot set up hub client: {e}")))?;
        Ok(Self { api, revision: revision.into() })
    }

    fn get(&self, repo: &ApiRepo, model: &str, file: &str) -> Result<PathBuf> {
        tracing::debug!("Fetching {model}/{file}");
        repo.get(file).map_err(|e| classify_hub_error(model, file, http_status(&e), &e.to_string()))
    }
}

impl ModelSource for HubSource {
    fn fetch(&self, model: &str) -> Result<ModelFiles> {
        tracing::info!("Fetching '{model}' (revision {}) from the hub", self.revision);
        let repo = self.api.repo(Repo::with_revision(
            model.to_string(),
            RepoType::Model,
            self.revision.clone(),
        ));

        // config.json first: it is the cheapest way to learn about
        // missing access before any large download starts.
        let config    = self.get(&repo, model, CONFIG_FILE)?;
        let tokenizer = self.get(&repo, model, TOKENIZER_FILE)?;

        let weights = match self.get(&repo, model, WEIGHTS_FILE) {
            Ok(path) => vec![path],
            Err(FinetuneError::NotFound(_)) => {
                let index = self.get(&repo, model, INDEX_FILE)?;
                shard_names(&index)?
                    .iter()
                    .map(|shard| self.get(&repo, model, shard))
                    .collect::<Result<Vec<_>>>()?
            }
            Err(e) => return Err(e),
        };

        Ok(ModelFiles { config, tokenizer, weights })
    }
}

/// HTTP status of a failed hub request, if the server answered.
fn http_status(err: &ApiError) -> Option<u16> {
    match err {
        ApiError::RequestError(transport) => match transport.as_ref() {
            ureq::Error::Status(code, _) => Some(*code),
            _ => None,
        },
        _ => None,
    }
}

/// Map a hub failure onto the error kind a user can act on.
fn classify_hub_error(model: &str, file: &str, status: Option<u16>, message: &str) -> FinetuneError {
    match status {
        Some(401 | 403) => FinetuneError::Authentication {
            model:  model.to_string(),
            reason: format!(
                "access to {file} was refused ({message}); set HF_TOKEN or run \
                 `huggingface-cli login` with an account that accepted the model licence"
            ),
        },
        Some(404) => FinetuneError::NotFound(format!("{model}/{file}")),
        _ => FinetuneError::format(format!("{model}/{file}"), format!("download failed: {message}")),
    }
}

// ─── LocalSource ──────────────────────────────────────────────────────────────

/// A directory laid out like a hub snapshot.
pub struct LocalSource;

impl ModelSource for LocalSource {
    fn fetch(&self, model: &str) -> Result<ModelFiles> {
        let dir = Path::new(model);
        let require = |name: &str| -> Result<PathBuf> {
            let path = dir.join(name);
            if path.is_file() {
                Ok(path)
            } else {
                Err(FinetuneError::NotFound(path.display().to_string()))
            }
        };

        let config    = require(CONFIG_FILE)?;
        let tokenizer = require(TOKENIZER_FILE)?;

        let single = dir.join(WEIGHTS_FILE);
        let weights = if single.is_file() {
            vec![single]
        } else {
            let index = require(INDEX_FILE)?;
            shard_names(&index)?
                .iter()
                .map(|shard| require(shard))
                .collect::<Result<Vec<_>>>()?
        };

        tracing::info!("Using local model files in '{}'", dir.display());
        Ok(ModelFiles { config, tokenizer, weights })
    }
}

/// An existing directory is read directly; anything else is a hub id.
pub fn source_for(model: &str, revision: &str) -> Result<Box<dyn ModelSource>> {
    if Path::new(model).is_dir() {
        Ok(Box::new(LocalSource))
    } else {
        Ok(Box::new(HubSource::new(resolve_token(), revision)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_env_token_wins_over_cached() {
        assert_eq!(pick_token(Some("hf_env".into()), Some("hf_file".into())).as_deref(), Some("hf_env"));
        assert_eq!(pick_token(Some("  ".into()), Some("hf_file\n".into())).as_deref(), Some("hf_file"));
        assert_eq!(pick_token(None, None), None);
    }

    #[test]
    fn test_hub_status_codes_map_to_error_kinds() {
        let e = classify_hub_error("meta-llama/Llama-3.2-3B", "config.json", Some(401), "status code 401");
        assert!(matches!(e, FinetuneError::Authentication { .. }));

        let e = classify_hub_error("meta-llama/Llama-3.2-3B", "config.json", Some(403), "status code 403");
        assert!(matches!(e, FinetuneError::Authentication { .. }));

        let e = classify_hub_error("nobody/nothing", "config.json", Some(404), "status code 404");
        assert!(matches!(e, FinetuneError::NotFound(_)));
    }

    #[test]
    fn test_digits_in_the_url_do_not_decide_the_kind() {
        let message = "https://huggingface.co/org/m/resolve/4040401a/model-00404.safetensors: status code 500";
        let e = classify_hub_error("org/m", "model-00404.safetensors", Some(500), message);
        assert!(matches!(e, FinetuneError::Format { .. }));

        let e = classify_hub_error("org/m", "config.json", None, "connection reset (401 retries)");
        assert!(matches!(e, FinetuneError::Format { .. }));
    }

    #[test]
    fn test_status_is_read_from_the_transport_error() {
        let response = ureq::Response::new(404, "Not Found", "").unwrap();
        let err = ApiError::RequestError(Box::new(ureq::Error::Status(404, response)));
        assert_eq!(http_status(&err), Some(404));
    }

    #[test]
    fn test_local_single_file_model() {
        let dir = tempfile::tempdir().unwrap();
        for f in [CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE] {
            fs::write(dir.path().join(f), b"{}").unwrap();
        }
        let files = LocalSource.fetch(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(files.weights, vec![dir.path().join(WEIGHTS_FILE)]);
    }

    #[test]
    fn test_local_sharded_model_lists_each_shard_once() {
        let dir = tempfile::tempdir().unwrap();
        for f in [CONFIG_FILE, TOKENIZER_FILE, "model-00001-of-00002.safetensors", "model-00002-of-00002.safetensors"] {
            fs::write(dir.path().join(f), b"{}").unwrap();
        }
        fs::write(dir.path().join(INDEX_FILE), r#"{
            "metadata": {"total_size": 1},
            "weight_map": {
                "model.embed_tokens.weight": "model-00001-of-00002.safetensors",
                "model.norm.weight": "model-00002-of-00002.safetensors",
                "lm_head.weight": "model-00002-of-00002.safetensors"
            }
        }"#).unwrap();

        let files = LocalSource.fetch(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(files.weights.len(), 2);
        assert!(files.weights[0].ends_with("model-00001-of-00002.safetensors"));
    }

    #[test]
    fn test_local_missing_tokenizer_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), b"{}").unwrap();
        let err = LocalSource.fetch(dir.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, FinetuneError::NotFound(ref p) if p.ends_with(TOKENIZER_FILE)));
    }
}
