//! Token/rule registry: a read-mostly repo backed by a TOML file.
//!
//! Loads via `toml::from_str` + `anyhow::Context`, and treats the loaded
//! config as swappable in-memory state behind an `RwLock`-guarded snapshot
//! so the registry can be reloaded without restarting the process.

use crate::error::TreasuryError;
use crate::types::{Rule, TokenCfg};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[async_trait]
pub trait ConfigRepo: Send + Sync {
    async fn get_token_cfg(&self, token_id: &str) -> Option<TokenCfg>;
    async fn get_enabled_rules(&self, token_id: &str, chain_id: u64) -> Vec<Rule>;

    /// Every configured token id, for the process entrypoint to spin up one
    /// Aggregator polling task per token.
    async fn list_token_ids(&self) -> Vec<String>;

    /// Every distinct `(token_id, chain_id)` an enabled rule targets, for
    /// the process entrypoint to spin up one Balancer polling task per pair.
    async fn list_rule_scopes(&self) -> Vec<(String, u64)>;
}

/// On-disk shape of the registry file: `[[tokens]]` / `[[rules]]` array of
/// tables.
#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(rename = "tokens", default)]
    tokens: Vec<TokenCfg>,
    #[serde(rename = "rules", default)]
    rules: Vec<Rule>,
}

struct Snapshot {
    tokens: Vec<TokenCfg>,
    rules: Vec<Rule>,
}

/// TOML-backed [`ConfigRepo`]. `reload` swaps the whole snapshot atomically
/// under the write lock so readers never observe a half-updated registry.
pub struct TomlConfigRepo {
    path: PathBuf,
    snapshot: RwLock<Snapshot>,
}

impl TomlConfigRepo {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = Self::read_snapshot(&path)?;
        Ok(Self {
            path,
            snapshot: RwLock::new(snapshot),
        })
    }

    /// Re-read the registry file and swap the in-memory snapshot. Call on a
    /// `SIGHUP` or a file-watch tick; never called from inside a hot path.
    pub fn reload(&self) -> Result<()> {
        let fresh = Self::read_snapshot(&self.path)?;
        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| anyhow::anyhow!("config registry lock poisoned"))?;
        *guard = fresh;
        Ok(())
    }

    fn read_snapshot(path: &Path) -> Result<Snapshot> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read registry file: {}", path.display()))?;
        let file: RegistryFile = toml::from_str(&content)
            .with_context(|| format!("failed to parse registry TOML: {}", path.display()))?;
        Ok(Snapshot {
            tokens: file.tokens,
            rules: file.rules,
        })
    }
}

#[async_trait]
impl ConfigRepo for TomlConfigRepo {
    async fn get_token_cfg(&self, token_id: &str) -> Option<TokenCfg> {
        let guard = self.snapshot.read().ok()?;
        guard
            .tokens
            .iter()
            .find(|t| t.token_id == token_id)
            .cloned()
    }

    async fn get_enabled_rules(&self, token_id: &str, chain_id: u64) -> Vec<Rule> {
        let Ok(guard) = self.snapshot.read() else {
            return Vec::new();
        };
        guard
            .rules
            .iter()
            .filter(|r| r.enabled && r.token_id == token_id && r.chain_id == chain_id)
            .cloned()
            .collect()
    }

    async fn list_token_ids(&self) -> Vec<String> {
        let Ok(guard) = self.snapshot.read() else {
            return Vec::new();
        };
        guard.tokens.iter().map(|t| t.token_id.clone()).collect()
    }

    async fn list_rule_scopes(&self) -> Vec<(String, u64)> {
        let Ok(guard) = self.snapshot.read() else {
            return Vec::new();
        };
        let mut scopes: Vec<(String, u64)> = guard
            .rules
            .iter()
            .filter(|r| r.enabled)
            .map(|r| (r.token_id.clone(), r.chain_id))
            .collect();
        scopes.sort();
        scopes.dedup();
        scopes
    }
}

/// Config-missing lookups should be reported with [`TreasuryError::ConfigMissing`]
/// at the call site, not inside the repo — the repo only answers "do I have
/// this", it doesn't know whether the caller treats absence as fatal.
pub async fn require_token_cfg(
    repo: &dyn ConfigRepo,
    token_id: &str,
) -> Result<TokenCfg, TreasuryError> {
    repo.get_token_cfg(token_id)
        .await
        .ok_or_else(|| TreasuryError::ConfigMissing {
            token_id: token_id.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(contents: &str) -> tempfile_path::TempToml {
        tempfile_path::TempToml::new(contents)
    }

    // Minimal temp-file helper so this module doesn't need a `tempfile` dev
    // dependency for one test fixture.
    mod tempfile_path {
        use std::io::Write;
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);

        pub struct TempToml {
            pub path: std::path::PathBuf,
        }
        impl TempToml {
            pub fn new(contents: &str) -> Self {
                let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
                let path = std::env::temp_dir().join(format!(
                    "treasury-sync-registry-test-{}-{}.toml",
                    std::process::id(),
                    unique
                ));
                let mut f = std::fs::File::create(&path).unwrap();
                f.write_all(contents.as_bytes()).unwrap();
                Self { path }
            }
        }
        impl Drop for TempToml {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    const FIXTURE: &str = r#"
[[tokens]]
token_id = "ETH"
chain_id = 137
epsilon_micros = 10000
delta_bps = 150
twap_window_sec = 1800
min_liquidity = "1000000000000000000000"
allowed_pools = ["pool-a"]

[tokens.ttl_by_source]
Chainlink = 300
Pyth = 60

[[rules]]
rule_id = "eth-hot-cold"
token_id = "ETH"
chain_id = 137
threshold_usd = "2000.00"
direction = "HotToCold"
hot_addr = "0x0000000000000000000000000000000000000001"
cold_addr = "0x0000000000000000000000000000000000000002"
execution_mode = "DirectKey"
hysteresis_bps = 100
cooldown_sec = 3600
enabled = true

[rules.amount]
kind = "percent"
bps = 5000
"#;

    #[tokio::test]
    async fn loads_tokens_and_rules_from_toml() {
        let fixture = write_fixture(FIXTURE);
        let repo = TomlConfigRepo::load(&fixture.path).unwrap();

        let cfg = repo.get_token_cfg("ETH").await.unwrap();
        assert_eq!(cfg.chain_id, 137);
        assert_eq!(cfg.min_liquidity, 1_000_000_000_000_000_000_000);

        let rules = repo.get_enabled_rules("ETH", 137).await;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].rule_id, "eth-hot-cold");
    }

    #[tokio::test]
    async fn unknown_token_is_none() {
        let fixture = write_fixture(FIXTURE);
        let repo = TomlConfigRepo::load(&fixture.path).unwrap();
        assert!(repo.get_token_cfg("BTC").await.is_none());
    }

    #[tokio::test]
    async fn disabled_rules_are_excluded() {
        let fixture = write_fixture(&FIXTURE.replace("enabled = true", "enabled = false"));
        let repo = TomlConfigRepo::load(&fixture.path).unwrap();
        assert!(repo.get_enabled_rules("ETH", 137).await.is_empty());
    }

    #[tokio::test]
    async fn reload_picks_up_file_changes() {
        let fixture = write_fixture(FIXTURE);
        let repo = TomlConfigRepo::load(&fixture.path).unwrap();
        assert!(repo.get_token_cfg("ETH").await.is_some());

        std::fs::write(&fixture.path, FIXTURE.replace("ETH", "WETH")).unwrap();
        repo.reload().unwrap();

        assert!(repo.get_token_cfg("ETH").await.is_none());
        assert!(repo.get_token_cfg("WETH").await.is_some());
    }

    #[tokio::test]
    async fn lists_token_ids_and_rule_scopes() {
        let fixture = write_fixture(FIXTURE);
        let repo = TomlConfigRepo::load(&fixture.path).unwrap();

        assert_eq!(repo.list_token_ids().await, vec!["ETH".to_string()]);
        assert_eq!(repo.list_rule_scopes().await, vec![("ETH".to_string(), 137)]);
    }

    #[tokio::test]
    async fn rule_scopes_exclude_disabled_rules() {
        let fixture = write_fixture(&FIXTURE.replace("enabled = true", "enabled = false"));
        let repo = TomlConfigRepo::load(&fixture.path).unwrap();
        assert!(repo.list_rule_scopes().await.is_empty());
    }
}
