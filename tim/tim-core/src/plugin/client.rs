//! HTTP client for plugin services.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::protocol::{parse_multihtml_response, PluginBlock};
use super::PluginError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PluginHost {
    /// Base URL, e.g. `http://csplugin:5000/cs/`.
    pub host: String,
    #[serde(default = "default_browser")]
    pub browser: bool,
}

fn default_browser() -> bool {
    true
}

/// Maps plugin type names to the services implementing them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginRegistry {
    hosts: BTreeMap<String, PluginHost>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin_type: impl Into<String>, host: impl Into<String>) {
        self.hosts.insert(
            plugin_type.into(),
            PluginHost {
                host: host.into(),
                browser: true,
            },
        );
    }

    pub fn host(&self, plugin_type: &str) -> Result<&PluginHost, PluginError> {
        self.hosts
            .get(plugin_type)
            .ok_or_else(|| PluginError::UnknownPlugin(plugin_type.to_string()))
    }

    pub fn needs_browser(&self, plugin_type: &str) -> Result<bool, PluginError> {
        Ok(self.host(plugin_type)?.browser)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }
}

/// Operations of the plugin contract. Responses are returned as raw text;
/// callers validate them with the protocol parsers.
#[async_trait]
pub trait PluginClient: Send + Sync {
    async fn reqs(&self, plugin_type: &str) -> Result<String, PluginError>;

    async fn html(&self, plugin_type: &str, body: &serde_json::Value) -> Result<String, PluginError>;

    async fn multihtml(&self, plugin_type: &str, body: &serde_json::Value) -> Result<String, PluginError>;

    async fn answer(&self, plugin_type: &str, body: &serde_json::Value) -> Result<String, PluginError>;
}

pub struct HttpPluginClient {
    client: reqwest::Client,
    registry: PluginRegistry,
    timeout: Duration,
    answer_timeout: Duration,
}

impl HttpPluginClient {
    pub fn new(registry: PluginRegistry, timeout: Duration, answer_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            registry,
            timeout,
            answer_timeout,
        }
    }

    async fn call(
        &self,
        plugin_type: &str,
        method: Method,
        route: &str,
        body: Option<&serde_json::Value>,
        timeout: Duration,
    ) -> Result<String, PluginError> {
        let host = self.registry.host(plugin_type)?;
        let url = format!("{}/{route}/", host.host.trim_end_matches('/'));
        let mut req = self.client.request(method, &url).timeout(timeout);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(|e| {
            tracing::warn!(plugin = plugin_type, %url, error = %e, "plugin call failed");
            PluginError::Unreachable(plugin_type.to_string())
        })?;
        resp.text().await.map_err(|e| {
            tracing::warn!(plugin = plugin_type, %url, error = %e, "reading plugin response failed");
            PluginError::Unreachable(plugin_type.to_string())
        })
    }
}

#[async_trait]
impl PluginClient for HttpPluginClient {
    async fn reqs(&self, plugin_type: &str) -> Result<String, PluginError> {
        self.call(plugin_type, Method::GET, "reqs", None, self.timeout).await
    }

    async fn html(&self, plugin_type: &str, body: &serde_json::Value) -> Result<String, PluginError> {
        self.call(plugin_type, Method::POST, "html", Some(body), self.timeout)
            .await
    }

    async fn multihtml(&self, plugin_type: &str, body: &serde_json::Value) -> Result<String, PluginError> {
        self.call(plugin_type, Method::POST, "multihtml", Some(body), self.timeout)
            .await
    }

    async fn answer(&self, plugin_type: &str, body: &serde_json::Value) -> Result<String, PluginError> {
        self.call(plugin_type, Method::PUT, "answer", Some(body), self.answer_timeout)
            .await
    }
}

/// Html of one plugin paragraph. A plugin that fails leaves `html` empty
/// and reports `error` instead.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct RenderedPlugin {
    pub par_id: String,
    pub plugin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub needs_browser: bool,
}

/// Render plugin paragraphs with one `/multihtml` call per plugin type.
/// The result keeps the order of `blocks`.
pub async fn render_plugins(
    client: &dyn PluginClient,
    registry: &PluginRegistry,
    blocks: Vec<PluginBlock>,
) -> crate::Result<Vec<RenderedPlugin>> {
    let mut by_type: BTreeMap<String, Vec<(usize, PluginBlock)>> = BTreeMap::new();
    for (i, block) in blocks.into_iter().enumerate() {
        by_type.entry(block.plugin_type.clone()).or_default().push((i, block));
    }
    let mut rendered = Vec::new();
    for (plugin_type, group) in by_type {
        let needs_browser = registry.needs_browser(&plugin_type).unwrap_or(true);
        let calls: Vec<_> = group.iter().map(|(_, b)| &b.call).collect();
        let body = serde_json::to_value(&calls)?;
        let htmls = client
            .multihtml(&plugin_type, &body)
            .await
            .and_then(|raw| parse_multihtml_response(&raw, calls.len()));
        let (htmls, error): (Vec<Option<String>>, _) = match htmls {
            Ok(htmls) => (htmls.into_iter().map(Some).collect(), None),
            Err(e) => {
                tracing::warn!(plugin = %plugin_type, error = %e, "multihtml failed");
                (vec![None; group.len()], Some(e.to_string()))
            }
        };
        rendered.extend(group.into_iter().zip(htmls).map(|((i, block), html)| {
            (
                i,
                RenderedPlugin {
                    par_id: block.par_id,
                    plugin: plugin_type.clone(),
                    html,
                    error: error.clone(),
                    needs_browser,
                },
            )
        }));
    }
    rendered.sort_by_key(|(i, _)| *i);
    Ok(rendered.into_iter().map(|(_, r)| r).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::protocol::HtmlCall;

    #[test]
    fn registry_from_toml_like_map() {
        let registry: PluginRegistry = serde_json::from_value(serde_json::json!({
            "csPlugin": {"host": "http://cs:5000/cs/"},
            "showImage": {"host": "http://svn:5000/image/", "browser": false}
        }))
        .unwrap();
        assert_eq!(registry.host("csPlugin").unwrap().host, "http://cs:5000/cs/");
        assert!(registry.needs_browser("csPlugin").unwrap());
        assert!(!registry.needs_browser("showImage").unwrap());
        assert_eq!(
            registry.host("nope").unwrap_err().to_string(),
            "Plugin does not exist: nope"
        );
    }

    struct Echo;

    #[async_trait]
    impl PluginClient for Echo {
        async fn reqs(&self, _plugin_type: &str) -> Result<String, PluginError> {
            Ok("{}".into())
        }

        async fn html(&self, _plugin_type: &str, _body: &serde_json::Value) -> Result<String, PluginError> {
            Ok(String::new())
        }

        async fn multihtml(&self, plugin_type: &str, body: &serde_json::Value) -> Result<String, PluginError> {
            if plugin_type != "mcq" {
                return Err(PluginError::Unreachable(plugin_type.to_string()));
            }
            let htmls: Vec<String> = body
                .as_array()
                .into_iter()
                .flatten()
                .map(|call| format!("<p>{}</p>", call["taskID"].as_str().unwrap_or_default()))
                .collect();
            Ok(serde_json::to_string(&htmls).unwrap())
        }

        async fn answer(&self, _plugin_type: &str, _body: &serde_json::Value) -> Result<String, PluginError> {
            Ok("{}".into())
        }
    }

    fn block(par_id: &str, plugin_type: &str) -> PluginBlock {
        PluginBlock {
            par_id: par_id.into(),
            plugin_type: plugin_type.into(),
            call: HtmlCall {
                markup: serde_json::json!({}),
                state: None,
                task_id: format!("1.{par_id}"),
            },
        }
    }

    #[tokio::test]
    async fn plugins_render_per_type_in_document_order() {
        let registry: PluginRegistry = serde_json::from_value(serde_json::json!({
            "mcq": {"host": "http://mcq/", "browser": false},
            "cs": {"host": "http://cs/"}
        }))
        .unwrap();
        let blocks = vec![block("a", "mcq"), block("b", "cs"), block("c", "mcq")];
        let rendered = render_plugins(&Echo, &registry, blocks).await.unwrap();
        let ids: Vec<&str> = rendered.iter().map(|r| r.par_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(rendered[0].html.as_deref(), Some("<p>1.a</p>"));
        assert_eq!(rendered[2].html.as_deref(), Some("<p>1.c</p>"));
        assert!(!rendered[0].needs_browser);
        assert_eq!(rendered[1].html, None);
        assert_eq!(rendered[1].error.as_deref(), Some("Could not connect to plugin: cs"));
        assert!(rendered[1].needs_browser);
    }

    #[tokio::test]
    async fn unreachable_plugin_is_reported() {
        let mut registry = PluginRegistry::new();
        // nothing listens on port 9 locally
        registry.register("mcq", "http://127.0.0.1:9/");
        let client = HttpPluginClient::new(registry, Duration::from_millis(500), Duration::from_millis(500));
        let err = client.answer("mcq", &serde_json::json!({})).await.unwrap_err();
        assert_eq!(err, PluginError::Unreachable("mcq".into()));
    }
}
