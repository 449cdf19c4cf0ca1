use serde::{Deserialize, Deserializer, Serialize};

/// 后端返回的模型信息，name 即身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelListResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

/// 生成参数。缺省字段 = 使用后端默认值，序列化时直接省略（不发 null）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
}

/// `GenerationParams` 里可以单独编辑的字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKey {
    Temperature,
    TopP,
    TopK,
    MaxTokens,
}

impl ParamKey {
    pub const ALL: [ParamKey; 4] = [
        ParamKey::Temperature,
        ParamKey::TopP,
        ParamKey::TopK,
        ParamKey::MaxTokens,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ParamKey::Temperature => "temperature",
            ParamKey::TopP => "top_p",
            ParamKey::TopK => "top_k",
            ParamKey::MaxTokens => "max_tokens",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl GenerationParams {
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none()
            && self.top_p.is_none()
            && self.top_k.is_none()
            && self.max_tokens.is_none()
    }

    /// 把 `other` 中存在的字段覆盖到自身，缺省字段保持不变
    pub fn merge(&mut self, other: &GenerationParams) {
        if other.temperature.is_some() {
            self.temperature = other.temperature;
        }
        if other.top_p.is_some() {
            self.top_p = other.top_p;
        }
        if other.top_k.is_some() {
            self.top_k = other.top_k;
        }
        if other.max_tokens.is_some() {
            self.max_tokens = other.max_tokens;
        }
    }

    /// 用用户输入的文本设置一个字段；空文本表示清除
    pub fn set_from_text(&mut self, key: ParamKey, text: &str) -> Result<(), String> {
        let text = text.trim();
        match key {
            ParamKey::Temperature => self.temperature = parse_float(key, text)?,
            ParamKey::TopP => self.top_p = parse_float(key, text)?,
            ParamKey::TopK => self.top_k = parse_int(key, text)?,
            ParamKey::MaxTokens => self.max_tokens = parse_int(key, text)?,
        }
        Ok(())
    }
}

fn parse_float(key: ParamKey, text: &str) -> Result<Option<f64>, String> {
    if text.is_empty() {
        return Ok(None);
    }
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Some(value)),
        _ => Err(format!("`{}` expects a number, got `{}`", key.as_str(), text)),
    }
}

fn parse_int(key: ParamKey, text: &str) -> Result<Option<i64>, String> {
    if text.is_empty() {
        return Ok(None);
    }
    text.parse::<i64>()
        .map(Some)
        .map_err(|_| format!("`{}` expects an integer, got `{}`", key.as_str(), text))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_input: String,
    pub params: GenerationParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub assistant_output: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMeta {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptListResponse {
    #[serde(default)]
    pub prompts: Vec<PromptMeta>,
}

/// 完整的提示词模板，id 由调用方指定，创建后不可修改
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub model_defaults: GenerationParams,
    #[serde(default, deserialize_with = "null_as_default")]
    pub body_md: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl PromptTemplate {
    /// 去掉标签两端空白并丢弃空标签
    pub fn normalized(mut self) -> Self {
        self.tags = normalize_tags(self.tags);
        self
    }

    /// 应用模板时显示的名称
    pub fn label(&self) -> &str {
        let name = self.name.trim();
        if !name.is_empty() {
            return name;
        }
        let id = self.id.trim();
        if !id.is_empty() {
            return id;
        }
        "Prompt"
    }
}

/// `"support, tone,, "` -> `["support", "tone"]`
pub fn parse_tags(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect()
}

/// `{prompt: PromptTemplate}` 信封；字段缺失交给调用方判断
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptEnvelope {
    #[serde(default)]
    pub prompt: Option<PromptTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareRequest {
    pub model: String,
    pub prompt_a_id: String,
    pub prompt_b_id: String,
    pub user_input: String,
    pub params: GenerationParams,
}

/// 单个提示词的对比结果：assistant_output 与 error 二选一
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareItemResult {
    pub prompt_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareResponse {
    pub model: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub results: Vec<CompareItemResult>,
}

impl CompareResponse {
    /// 按 prompt id 查找结果；id 不在结果里时才退回到位置下标
    pub fn result_for(&self, prompt_id: &str, fallback_index: usize) -> Option<&CompareItemResult> {
        if !prompt_id.is_empty() {
            if let Some(found) = self.results.iter().find(|r| r.prompt_id == prompt_id) {
                return Some(found);
            }
        }
        self.results.get(fallback_index)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_skip_absent_fields() {
        let params = GenerationParams {
            temperature: Some(0.5),
            max_tokens: Some(256),
            ..Default::default()
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value, json!({ "temperature": 0.5, "max_tokens": 256 }));
        assert_eq!(serde_json::to_value(GenerationParams::default()).unwrap(), json!({}));
    }

    #[test]
    fn stripped_params_rebuild_effective_config_with_defaults() {
        let defaults = GenerationParams {
            temperature: Some(0.7),
            top_p: Some(0.9),
            top_k: Some(40),
            max_tokens: Some(512),
        };
        let cases = [
            GenerationParams::default(),
            GenerationParams {
                top_k: Some(5),
                ..Default::default()
            },
            GenerationParams {
                temperature: Some(0.0),
                top_p: Some(1.0),
                ..Default::default()
            },
        ];

        for input in cases {
            let sent = serde_json::to_value(&input).unwrap();
            let sent_keys: Vec<&String> = sent.as_object().unwrap().keys().collect();
            for key in &sent_keys {
                let present = match key.as_str() {
                    "temperature" => input.temperature.is_some(),
                    "top_p" => input.top_p.is_some(),
                    "top_k" => input.top_k.is_some(),
                    "max_tokens" => input.max_tokens.is_some(),
                    _ => false,
                };
                assert!(present, "unexpected key {key}");
            }

            let received: GenerationParams = serde_json::from_value(sent).unwrap();
            let mut effective = defaults.clone();
            effective.merge(&received);
            let mut expected = defaults.clone();
            expected.merge(&input);
            assert_eq!(effective, expected);
        }
    }

    #[test]
    fn params_accept_null_as_absent() {
        let params: GenerationParams =
            serde_json::from_value(json!({ "temperature": null, "top_k": 3 })).unwrap();
        assert_eq!(params.temperature, None);
        assert_eq!(params.top_k, Some(3));
    }

    #[test]
    fn set_from_text_clears_on_blank_and_rejects_garbage() {
        let mut params = GenerationParams {
            top_p: Some(0.9),
            ..Default::default()
        };
        params.set_from_text(ParamKey::TopP, "  ").unwrap();
        assert_eq!(params.top_p, None);

        params.set_from_text(ParamKey::TopK, "12").unwrap();
        assert_eq!(params.top_k, Some(12));

        assert!(params.set_from_text(ParamKey::MaxTokens, "1.5").is_err());
        assert!(params.set_from_text(ParamKey::Temperature, "warm").is_err());
        assert_eq!(ParamKey::parse("TOP_P"), Some(ParamKey::TopP));
    }

    #[test]
    fn template_fills_missing_collections() {
        let template: PromptTemplate = serde_json::from_value(json!({
            "id": "support",
            "name": "Support",
            "tags": null,
            "model_defaults": null
        }))
        .unwrap();
        assert!(template.tags.is_empty());
        assert!(template.model_defaults.is_empty());
        assert_eq!(template.body_md, "");
    }

    #[test]
    fn parse_tags_trims_and_drops_empty() {
        assert_eq!(parse_tags(" support, tone ,, "), vec!["support", "tone"]);
        assert!(parse_tags("").is_empty());
    }

    #[test]
    fn compare_lookup_prefers_id_over_position() {
        let response: CompareResponse = serde_json::from_value(json!({
            "model": "m",
            "input": "hi",
            "results": [
                { "prompt_id": "b", "assistant_output": "from b" },
                { "prompt_id": "a", "error": "boom" }
            ]
        }))
        .unwrap();

        assert_eq!(response.result_for("a", 0).unwrap().prompt_id, "a");
        assert_eq!(response.result_for("b", 1).unwrap().prompt_id, "b");
        assert_eq!(response.result_for("zzz", 1).unwrap().prompt_id, "a");
        assert!(response.result_for("zzz", 5).is_none());
    }
}
