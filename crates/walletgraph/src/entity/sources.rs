//! External entity lookups. Each source answers one question about an
//! address and returns `Ok(None)` when it has nothing to say.

use anyhow::Context;
use futures_util::future::{BoxFuture, FutureExt};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

use super::EntitySource;
use crate::types::{AnnotationSource, EntityAnnotation, EntityKind};

async fn get_json(client: &reqwest::Client, url: &str) -> anyhow::Result<Option<Value>> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {url} failed"))?;
    json_body(resp).await
}

async fn json_body(resp: reqwest::Response) -> anyhow::Result<Option<Value>> {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    if !status.is_success() {
        anyhow::bail!("lookup returned {status}");
    }
    let body = resp.json().await.context("lookup returned invalid JSON")?;
    Ok(Some(body))
}

fn non_empty(v: &Value, pointer: &str) -> Option<String> {
    v.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Reverse lookup of the address's favourite `.sol` domain.
pub struct NameServiceSource {
    base_url: String,
    client: reqwest::Client,
}

impl NameServiceSource {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

/// `{"s":"ok","result":{"domain":"<pubkey>","reverse":"bonfida"}}`
pub fn parse_name_service(body: &Value) -> Option<EntityAnnotation> {
    if body.get("s").and_then(Value::as_str) != Some("ok") {
        return None;
    }
    let reverse = non_empty(body, "/result/reverse")?;
    let domain = format!("{}.sol", reverse.trim_end_matches(".sol"));
    let mut metadata = serde_json::json!({ "domain": domain });
    if let Some(key) = non_empty(body, "/result/domain") {
        metadata["domainKey"] = Value::String(key);
    }
    Some(
        EntityAnnotation::new(
            domain,
            EntityKind::SnsDomain,
            "Solana Name Service domain",
            AnnotationSource::NameService,
        )
        .with_metadata(metadata),
    )
}

impl EntitySource for NameServiceSource {
    fn name(&self) -> &'static str {
        "name_service"
    }

    fn lookup<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<EntityAnnotation>>> {
        async move {
            let url = format!(
                "{}/favorite-domain/{}",
                self.base_url,
                urlencoding::encode(address)
            );
            let body = get_json(&self.client, &url).await?;
            Ok(body.as_ref().and_then(parse_name_service))
        }
        .boxed()
    }
}

/// Community address labels (friendly name plus category).
pub struct LabelServiceSource {
    base_url: String,
    client: reqwest::Client,
}

impl LabelServiceSource {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

pub fn parse_label_service(body: &Value) -> Option<EntityAnnotation> {
    let data = body.pointer("/result/data")?;
    let name = non_empty(data, "/friendlyName").or_else(|| non_empty(data, "/abbreviation"))?;
    let category = non_empty(data, "/category");
    let kind = category
        .as_deref()
        .and_then(EntityKind::from_str_loose)
        .unwrap_or(EntityKind::LabeledAddress);
    let description = match &category {
        Some(c) => format!("Labeled address ({c})"),
        None => "Labeled address".to_string(),
    };
    let mut annotation =
        EntityAnnotation::new(name, kind, description, AnnotationSource::LabelService);
    if let Some(c) = category {
        annotation = annotation.with_metadata(serde_json::json!({ "category": c }));
    }
    Some(annotation)
}

impl EntitySource for LabelServiceSource {
    fn name(&self) -> &'static str {
        "label_service"
    }

    fn lookup<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<EntityAnnotation>>> {
        async move {
            let url = format!("{}/{}", self.base_url, urlencoding::encode(address));
            let body = get_json(&self.client, &url).await?;
            Ok(body.as_ref().and_then(parse_label_service))
        }
        .boxed()
    }
}

/// Token entry as returned by either token-list provider.
fn token_annotation(entry: &Value, address: &str) -> Option<EntityAnnotation> {
    if entry.get("address").and_then(Value::as_str) != Some(address) {
        return None;
    }
    let name = non_empty(entry, "/name")?;
    let symbol = non_empty(entry, "/symbol");
    let display = match &symbol {
        Some(s) => format!("{name} ({s})"),
        None => name.clone(),
    };
    let metadata = serde_json::json!({
        "symbol": symbol,
        "decimals": entry.get("decimals").and_then(Value::as_u64),
        "logoURI": non_empty(entry, "/logoURI"),
    });
    Some(
        EntityAnnotation::new(display, EntityKind::Token, "Token mint", AnnotationSource::TokenList)
            .with_metadata(metadata),
    )
}

/// Jupiter-style token list: `GET {base}/{mint}` returns one entry.
pub struct TokenListSource {
    base_url: String,
    client: reqwest::Client,
}

impl TokenListSource {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

pub fn parse_token_list(body: &Value, address: &str) -> Option<EntityAnnotation> {
    token_annotation(body, address)
}

impl EntitySource for TokenListSource {
    fn name(&self) -> &'static str {
        "token_list"
    }

    fn lookup<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<EntityAnnotation>>> {
        async move {
            let url = format!("{}/{}", self.base_url, urlencoding::encode(address));
            let body = get_json(&self.client, &url).await?;
            Ok(body.as_ref().and_then(|b| parse_token_list(b, address)))
        }
        .boxed()
    }
}

/// Token-info API: `POST {base}/mints?chainId=101` with `{"addresses":[..]}`.
pub struct TokenInfoSource {
    base_url: String,
    client: reqwest::Client,
}

impl TokenInfoSource {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }
}

pub fn parse_token_info(body: &Value, address: &str) -> Option<EntityAnnotation> {
    body.get("content")?
        .as_array()?
        .iter()
        .find_map(|entry| token_annotation(entry, address))
}

impl EntitySource for TokenInfoSource {
    fn name(&self) -> &'static str {
        "token_info"
    }

    fn lookup<'a>(
        &'a self,
        address: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<Option<EntityAnnotation>>> {
        async move {
            let url = format!("{}/mints?chainId=101", self.base_url);
            let resp = self
                .client
                .post(&url)
                .json(&serde_json::json!({ "addresses": [address] }))
                .send()
                .await
                .with_context(|| format!("POST {url} failed"))?;
            let body = json_body(resp).await?;
            Ok(body.as_ref().and_then(|b| parse_token_info(b, address)))
        }
        .boxed()
    }
}

/// The external cascade in lookup order.
pub fn default_sources(
    cfg: &common::config::EntitySources,
) -> anyhow::Result<Vec<Box<dyn EntitySource>>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_millis(cfg.lookup_timeout_ms))
        .build()
        .context("failed to build entity lookup HTTP client")?;

    Ok(vec![
        Box::new(NameServiceSource::new(&cfg.name_service_url, client.clone())),
        Box::new(LabelServiceSource::new(&cfg.label_service_url, client.clone())),
        Box::new(TokenListSource::new(&cfg.token_list_url, client.clone())),
        Box::new(TokenInfoSource::new(&cfg.token_info_url, client)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    const BONK: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

    #[test]
    fn test_parse_name_service() {
        let body = serde_json::json!({
            "s": "ok",
            "result": {
                "domain": "Crf8hzfthWGbGbLTVCiqRqV5MVnbpHB1L9KQMd6gsinb",
                "reverse": "bonfida"
            }
        });
        let a = parse_name_service(&body).unwrap();
        assert_eq!(a.name, "bonfida.sol");
        assert_eq!(a.kind, EntityKind::SnsDomain);
        assert_eq!(a.source, AnnotationSource::NameService);
        assert_eq!(a.metadata.unwrap()["domain"], "bonfida.sol");

        let missing = serde_json::json!({"s": "error", "result": "not found"});
        assert!(parse_name_service(&missing).is_none());
    }

    #[test]
    fn test_parse_label_service_maps_category() {
        let body = serde_json::json!({
            "status": "success",
            "result": {"data": {"friendlyName": "Raydium Authority V4", "category": "DEX"}}
        });
        let a = parse_label_service(&body).unwrap();
        assert_eq!(a.name, "Raydium Authority V4");
        assert_eq!(a.kind, EntityKind::Dex);

        let body = serde_json::json!({
            "result": {"data": {"friendlyName": "Some Whale", "category": "whales"}}
        });
        assert_eq!(parse_label_service(&body).unwrap().kind, EntityKind::LabeledAddress);

        let body = serde_json::json!({"result": {"data": {"friendlyName": ""}}});
        assert!(parse_label_service(&body).is_none());
    }

    #[test]
    fn test_parse_token_list() {
        let body = serde_json::json!({
            "address": BONK,
            "name": "Bonk",
            "symbol": "Bonk",
            "decimals": 5,
            "logoURI": "https://arweave.net/hQiPZOsRZXGXBJd_82PhVdlM_hACsT_q6wqwf5cSY7I"
        });
        let a = parse_token_list(&body, BONK).unwrap();
        assert_eq!(a.name, "Bonk (Bonk)");
        assert_eq!(a.kind, EntityKind::Token);
        assert_eq!(a.metadata.as_ref().unwrap()["decimals"], 5);
        // Entries for a different mint are ignored.
        assert!(parse_token_list(&body, "other").is_none());
    }

    #[test]
    fn test_parse_token_info() {
        let body = serde_json::json!({
            "content": [
                {"address": "other", "name": "Other", "symbol": "OTH"},
                {"address": BONK, "name": "Bonk", "symbol": "Bonk", "decimals": 5}
            ]
        });
        assert_eq!(parse_token_info(&body, BONK).unwrap().name, "Bonk (Bonk)");
        assert!(parse_token_info(&serde_json::json!({"content": []}), BONK).is_none());
    }

    #[test]
    fn test_default_sources_order() {
        let cfg = common::config::Config::from_toml_str(include_str!(
            "../../../../config/default.toml"
        ))
        .unwrap();
        let names: Vec<&str> = default_sources(&cfg.entity_sources)
            .unwrap()
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(
            names,
            vec!["name_service", "label_service", "token_list", "token_info"]
        );
    }
}
