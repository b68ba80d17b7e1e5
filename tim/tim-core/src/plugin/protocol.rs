//! JSON payloads exchanged with plugin services.

use serde::Serialize;
use serde_json::{Map, Value};

use super::PluginError;

/// Body of `PUT <plugin-host>/answer/`.
#[derive(Debug, Serialize)]
pub struct AnswerCall {
    pub markup: Value,
    pub state: Option<Value>,
    pub input: Value,
    #[serde(rename = "taskID")]
    pub task_id: String,
    pub info: Value,
}

/// Body of `POST <plugin-host>/html/`.
#[derive(Debug, Serialize)]
pub struct HtmlCall {
    pub markup: Value,
    pub state: Option<Value>,
    #[serde(rename = "taskID")]
    pub task_id: String,
}

/// A plugin paragraph of a document together with its html request.
#[derive(Debug)]
pub struct PluginBlock {
    pub par_id: String,
    pub plugin_type: String,
    pub call: HtmlCall,
}

/// Parse a `/multihtml` reply: a JSON array with one html string per
/// requested block, in request order.
pub fn parse_multihtml_response(body: &str, expected: usize) -> Result<Vec<String>, PluginError> {
    match serde_json::from_str::<Vec<String>>(body) {
        Ok(htmls) if htmls.len() == expected => Ok(htmls),
        _ => Err(PluginError::InvalidJson(body.to_string())),
    }
}

/// A validated answer response.
#[derive(Clone, Debug, PartialEq)]
pub struct AnswerResponse {
    pub web: Value,
    pub save: Option<Value>,
    pub tim_info: Map<String, Value>,
}

impl AnswerResponse {
    pub fn points(&self) -> Option<f64> {
        self.tim_info.get("points").and_then(Value::as_f64)
    }

    /// Tags stored alongside the answer, taken from `save.tags`.
    pub fn tags(&self) -> Vec<String> {
        self.save
            .as_ref()
            .and_then(|s| s.get("tags"))
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parse the raw text returned by a plugin's answer route.
pub fn parse_answer_response(body: &str) -> Result<AnswerResponse, PluginError> {
    let mut value: Map<String, Value> = match serde_json::from_str(body) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => return Err(PluginError::InvalidJson(body.to_string())),
    };
    let web = value
        .remove("web")
        .ok_or_else(|| PluginError::MissingKey("web".to_string()))?;
    let save = value.remove("save").filter(|v| !v.is_null());
    let tim_info = match value.remove("tim_info") {
        Some(Value::Object(m)) => m,
        _ => Map::new(),
    };
    Ok(AnswerResponse { web, save, tim_info })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_response() {
        let body = json!({
            "web": {"result": "saved"},
            "save": {"userinput": "abc", "tags": ["a", 1, "b"]},
            "tim_info": {"points": 2.5}
        })
        .to_string();
        let resp = parse_answer_response(&body).unwrap();
        assert_eq!(resp.web, json!({"result": "saved"}));
        assert_eq!(resp.points(), Some(2.5));
        assert_eq!(resp.tags(), vec!["a", "b"]);
    }

    #[test]
    fn missing_web_key_is_reported() {
        let err = parse_answer_response(r#"{"save": {}}"#).unwrap_err();
        assert_eq!(err, PluginError::MissingKey("web".into()));
        assert_eq!(err.to_string(), r#"The key "web" is missing in plugin response."#);
    }

    #[test]
    fn non_json_is_reported_with_body() {
        let err = parse_answer_response("<html>oops</html>").unwrap_err();
        assert_eq!(
            err.to_string(),
            "The plugin response was not a valid JSON string. The response was: <html>oops</html>"
        );
        assert!(matches!(parse_answer_response("[1,2]"), Err(PluginError::InvalidJson(_))));
    }

    #[test]
    fn multihtml_reply_must_match_request() {
        assert_eq!(
            parse_multihtml_response(r#"["<a>", "<b>"]"#, 2).unwrap(),
            vec!["<a>", "<b>"]
        );
        assert!(parse_multihtml_response(r#"["<a>"]"#, 2).is_err());
        assert!(parse_multihtml_response("<a>", 1).is_err());
    }

    #[test]
    fn call_serializes_task_id_key() {
        let call = AnswerCall {
            markup: json!({}),
            state: None,
            input: json!({"x": 1}),
            task_id: "1.t".into(),
            info: json!(null),
        };
        let v = serde_json::to_value(&call).unwrap();
        assert_eq!(v["taskID"], "1.t");
        assert!(v["state"].is_null());
    }
}
