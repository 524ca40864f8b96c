use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::branding;
use crate::profile_manager::Profile;

use super::types::{Message, Role};

/// One entry of the `messages` array sent upstream. Only role and content
/// cross the wire; ids, citations and prompts stay local.
#[derive(Debug, Clone, Serialize)]
pub struct ApiMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ChatRequestBody {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    pub system_prompt: String,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub max_tokens: u32,
    #[serde(rename = "gptId")]
    pub gpt_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
}

/// A fully prepared upstream request: the JSON body, extra headers, and the
/// id the abort registry tracks it under.
#[derive(Debug, Clone)]
pub struct BuiltRequest {
    pub request_id: String,
    pub body: ChatRequestBody,
    pub headers: HashMap<String, String>,
}

/// Profiles with an empty or whitespace-only system prompt fall back to the
/// built-in one so the upstream never sees a blank instruction block.
pub fn effective_system_prompt(profile: &Profile) -> String {
    let trimmed = profile.system_prompt.trim();
    if trimmed.is_empty() {
        branding::DEFAULT_SYSTEM_PROMPT.to_string()
    } else {
        profile.system_prompt.clone()
    }
}

pub fn build_chat_request(
    profile: &Profile,
    history: &[Message],
    web_search_enabled: bool,
    api_key: Option<&str>,
) -> BuiltRequest {
    let messages = history
        .iter()
        .map(|m| ApiMessage {
            role: m.role,
            content: m.content.clone(),
        })
        .collect();

    let tools = if web_search_enabled {
        Some(vec![Tool {
            kind: "web_search_preview".to_string(),
        }])
    } else {
        None
    };

    let mut headers = HashMap::new();
    if let Some(key) = api_key {
        let key = key.trim();
        if !key.is_empty() {
            headers.insert("X-User-API-Key".to_string(), key.to_string());
        }
    }

    BuiltRequest {
        request_id: Uuid::new_v4().to_string(),
        body: ChatRequestBody {
            model: profile.model.clone(),
            messages,
            system_prompt: effective_system_prompt(profile),
            temperature: profile.temperature,
            top_p: profile.top_p,
            frequency_penalty: profile.frequency_penalty,
            max_tokens: profile.max_tokens,
            gpt_id: profile.id.clone(),
            tools,
        },
        headers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_profile() -> Profile {
        let mut profile = Profile::default_profile();
        profile.id = "gpt-test".to_string();
        profile.system_prompt = "Be terse.".to_string();
        profile
    }

    #[test]
    fn test_build_request_body_shape() {
        let profile = make_profile();
        let history = vec![Message::user("hi")];
        let built = build_chat_request(&profile, &history, true, Some("sk-123"));

        let json = serde_json::to_value(&built.body).unwrap();
        assert_eq!(json["gptId"], "gpt-test");
        assert_eq!(json["system_prompt"], "Be terse.");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hi");
        assert_eq!(json["tools"][0]["type"], "web_search_preview");
        assert_eq!(
            built.headers.get("X-User-API-Key").map(String::as_str),
            Some("sk-123")
        );
        assert!(!built.request_id.is_empty());
    }

    #[test]
    fn test_no_tools_key_when_web_search_disabled() {
        let profile = make_profile();
        let built = build_chat_request(&profile, &[Message::user("hi")], false, None);
        let json = serde_json::to_value(&built.body).unwrap();
        assert!(json.get("tools").is_none());
        assert!(built.headers.is_empty());
    }

    #[test]
    fn test_blank_system_prompt_falls_back_to_default() {
        let mut profile = make_profile();
        profile.system_prompt = "   ".to_string();
        let built = build_chat_request(&profile, &[], false, None);
        assert_eq!(built.body.system_prompt, branding::DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_blank_api_key_is_not_sent() {
        let profile = make_profile();
        let built = build_chat_request(&profile, &[], false, Some("  "));
        assert!(built.headers.is_empty());
    }
}
