use http::{HeaderMap, HeaderName, HeaderValue};

use crate::error::DispatchError;
use crate::protocol::access::{AnthropicAccess, GeminiAccess, OllamaAccess, OpenAiAccess};
use crate::protocol::Dialect;

pub const ANTHROPIC_DEFAULT_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_HELICONE_HOST: &str = "https://anthropic.hconeai.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const GEMINI_DEFAULT_HOST: &str = "https://generativelanguage.googleapis.com";
pub const OLLAMA_DEFAULT_HOST: &str = "http://127.0.0.1:11434";
pub const OPENAI_HELICONE_HOST: &str = "https://oai.hconeai.com";
pub const AZURE_API_VERSION: &str = "2023-07-01-preview";
pub const OPENROUTER_REFERER: &str = "http://localhost";
pub const OPENROUTER_TITLE: &str = "streamgate";

/// Resolved target of one dispatch: absolute URL plus vendor auth headers.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    pub url: String,
    pub headers: HeaderMap,
}

/// Default host of an OpenAI-compatible dialect, `None` when the user must supply one.
#[must_use]
pub fn openai_family_default_host(dialect: Dialect) -> Option<&'static str> {
    match dialect {
        Dialect::OpenAi => Some("https://api.openai.com"),
        Dialect::Deepseek => Some("https://api.deepseek.com"),
        Dialect::Groq => Some("https://api.groq.com/openai"),
        Dialect::LmStudio => Some("http://localhost:1234"),
        Dialect::LocalAi => Some("http://127.0.0.1:8080"),
        Dialect::Mistral => Some("https://api.mistral.ai"),
        Dialect::OpenRouter => Some("https://openrouter.ai/api"),
        Dialect::Perplexity => Some("https://api.perplexity.ai"),
        Dialect::TogetherAi => Some("https://api.together.xyz"),
        Dialect::Azure | Dialect::Anthropic | Dialect::Gemini | Dialect::Ollama => None,
    }
}

/// Vendors usually reached on the local machine; bare hosts default to `http://`.
fn is_local_dialect(dialect: Dialect) -> bool {
    matches!(
        dialect,
        Dialect::Ollama | Dialect::LmStudio | Dialect::LocalAi
    )
}

/// Normalize a user-supplied host into an origin without a trailing slash.
///
/// Bare hosts get a scheme prepended. The result must parse as an absolute
/// `http(s)` URL.
pub(crate) fn normalize_host(dialect: Dialect, host: &str) -> Result<String, DispatchError> {
    let trimmed = host.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(DispatchError::prepare(dialect, "host is empty"));
    }
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else if is_local_dialect(dialect) {
        format!("http://{trimmed}")
    } else {
        format!("https://{trimmed}")
    };
    let parsed = url::Url::parse(&with_scheme)
        .map_err(|err| DispatchError::prepare(dialect, format_args!("invalid host '{host}' ({err})")))?;
    if parsed.host_str().is_none() {
        return Err(DispatchError::prepare(
            dialect,
            format_args!("invalid host '{host}'"),
        ));
    }
    Ok(with_scheme)
}

/// Append `segments` to `base`, percent-encoding each one, and set `query`.
fn join_url(
    dialect: Dialect,
    base: &str,
    segments: &[&str],
    query: Option<&str>,
) -> Result<String, DispatchError> {
    let mut url = url::Url::parse(base)
        .map_err(|err| DispatchError::prepare(dialect, format_args!("invalid host '{base}' ({err})")))?;
    url.path_segments_mut()
        .map_err(|()| DispatchError::prepare(dialect, format_args!("host '{base}' cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    url.set_query(query);
    Ok(url.into())
}

fn custom_host(host: Option<&str>) -> Option<&str> {
    host.map(str::trim).filter(|host| !host.is_empty())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn insert_header(
    headers: &mut HeaderMap,
    dialect: Dialect,
    name: &'static str,
    value: &str,
) -> Result<(), DispatchError> {
    let value = HeaderValue::from_str(value).map_err(|_| {
        DispatchError::prepare(dialect, format_args!("invalid characters in '{name}' header"))
    })?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

pub(crate) fn anthropic_endpoint(access: &AnthropicAccess) -> Result<Endpoint, DispatchError> {
    let dialect = Dialect::Anthropic;
    let key = access.anthropic_key.trim();
    let host = custom_host(access.anthropic_host.as_deref());
    let heli_key = non_empty(access.heli_key.as_deref());
    if key.is_empty() && host.is_none() {
        return Err(DispatchError::prepare(dialect, "missing API key"));
    }

    let base = match (host, heli_key) {
        (Some(host), _) => normalize_host(dialect, host)?,
        (None, Some(_)) => ANTHROPIC_HELICONE_HOST.to_string(),
        (None, None) => ANTHROPIC_DEFAULT_HOST.to_string(),
    };

    let mut headers = HeaderMap::new();
    if !key.is_empty() {
        insert_header(&mut headers, dialect, "x-api-key", key)?;
    }
    insert_header(&mut headers, dialect, "anthropic-version", ANTHROPIC_VERSION)?;
    if let Some(heli_key) = heli_key {
        insert_header(&mut headers, dialect, "helicone-auth", &format!("Bearer {heli_key}"))?;
    }

    Ok(Endpoint {
        url: format!("{base}/v1/messages"),
        headers,
    })
}

pub(crate) fn gemini_endpoint(access: &GeminiAccess, model_id: &str) -> Result<Endpoint, DispatchError> {
    let dialect = Dialect::Gemini;
    let key = access.gemini_key.trim();
    if key.is_empty() {
        return Err(DispatchError::prepare(dialect, "missing API key"));
    }
    let base = match custom_host(access.gemini_host.as_deref()) {
        Some(host) => normalize_host(dialect, host)?,
        None => GEMINI_DEFAULT_HOST.to_string(),
    };
    let model = model_id.trim().trim_start_matches("models/");
    if model.is_empty() {
        return Err(DispatchError::prepare(dialect, "missing model id"));
    }

    let mut headers = HeaderMap::new();
    insert_header(&mut headers, dialect, "x-goog-api-key", key)?;

    let action = format!("{model}:streamGenerateContent");
    Ok(Endpoint {
        url: join_url(dialect, &base, &["v1beta", "models", action.as_str()], Some("alt=sse"))?,
        headers,
    })
}

pub(crate) fn ollama_endpoint(access: &OllamaAccess) -> Result<Endpoint, DispatchError> {
    let base = match custom_host(access.ollama_host.as_deref()) {
        Some(host) => normalize_host(Dialect::Ollama, host)?,
        None => OLLAMA_DEFAULT_HOST.to_string(),
    };
    Ok(Endpoint {
        url: format!("{base}/api/chat"),
        headers: HeaderMap::new(),
    })
}

pub(crate) fn openai_family_endpoint(
    dialect: Dialect,
    access: &OpenAiAccess,
    model_id: &str,
) -> Result<Endpoint, DispatchError> {
    let key = access.oai_key.trim();
    let host = custom_host(access.oai_host.as_deref());
    let heli_key = non_empty(access.heli_key.as_deref()).filter(|_| dialect == Dialect::OpenAi);
    let mut headers = HeaderMap::new();

    if dialect == Dialect::Azure {
        let Some(host) = host else {
            return Err(DispatchError::prepare(dialect, "missing endpoint host"));
        };
        if key.is_empty() {
            return Err(DispatchError::prepare(dialect, "missing API key"));
        }
        let deployment = model_id.trim();
        if deployment.is_empty() {
            return Err(DispatchError::prepare(dialect, "missing deployment id"));
        }
        let base = normalize_host(dialect, host)?;
        insert_header(&mut headers, dialect, "api-key", key)?;
        let query = format!("api-version={AZURE_API_VERSION}");
        return Ok(Endpoint {
            url: join_url(
                dialect,
                &base,
                &["openai", "deployments", deployment, "chat", "completions"],
                Some(&query),
            )?,
            headers,
        });
    }

    let key_optional = matches!(dialect, Dialect::LmStudio | Dialect::LocalAi);
    if key.is_empty() && host.is_none() && !key_optional {
        return Err(DispatchError::prepare(dialect, "missing API key"));
    }

    let base = match (host, heli_key) {
        (Some(host), _) => normalize_host(dialect, host)?,
        (None, Some(_)) => OPENAI_HELICONE_HOST.to_string(),
        (None, None) => openai_family_default_host(dialect)
            .ok_or_else(|| DispatchError::prepare(dialect, "missing endpoint host"))?
            .to_string(),
    };

    if !key.is_empty() {
        insert_header(&mut headers, dialect, "authorization", &format!("Bearer {key}"))?;
    }
    if dialect == Dialect::OpenAi {
        if let Some(org) = non_empty(access.oai_org.as_deref()) {
            insert_header(&mut headers, dialect, "openai-organization", org)?;
        }
    }
    if let Some(heli_key) = heli_key {
        insert_header(&mut headers, dialect, "helicone-auth", &format!("Bearer {heli_key}"))?;
    }
    if dialect == Dialect::OpenRouter {
        insert_header(&mut headers, dialect, "http-referer", OPENROUTER_REFERER)?;
        insert_header(&mut headers, dialect, "x-title", OPENROUTER_TITLE)?;
    }

    let path = if dialect == Dialect::Perplexity {
        "/chat/completions"
    } else {
        "/v1/chat/completions"
    };
    Ok(Endpoint {
        url: format!("{base}{path}"),
        headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oai(key: &str, host: Option<&str>) -> OpenAiAccess {
        OpenAiAccess {
            oai_key: key.to_string(),
            oai_host: host.map(str::to_string),
            ..OpenAiAccess::default()
        }
    }

    #[test]
    fn test_normalize_host_adds_scheme_and_trims_slash() {
        assert_eq!(
            normalize_host(Dialect::OpenAi, "proxy.example.com/").unwrap(),
            "https://proxy.example.com"
        );
        assert_eq!(
            normalize_host(Dialect::Ollama, "gpu-box:11434").unwrap(),
            "http://gpu-box:11434"
        );
        assert_eq!(
            normalize_host(Dialect::Anthropic, "http://10.0.0.2:8080/").unwrap(),
            "http://10.0.0.2:8080"
        );
    }

    #[test]
    fn test_normalize_host_rejects_garbage() {
        assert!(normalize_host(Dialect::OpenAi, "   ").is_err());
        assert!(normalize_host(Dialect::OpenAi, "https://").is_err());
    }

    #[test]
    fn test_build_url_anthropic_default() {
        let access = AnthropicAccess {
            anthropic_key: "sk-ant".to_string(),
            ..AnthropicAccess::default()
        };
        let endpoint = anthropic_endpoint(&access).unwrap();
        assert_eq!(endpoint.url, "https://api.anthropic.com/v1/messages");
        assert_eq!(endpoint.headers["x-api-key"], "sk-ant");
        assert_eq!(endpoint.headers["anthropic-version"], ANTHROPIC_VERSION);
    }

    #[test]
    fn test_build_url_anthropic_helicone() {
        let access = AnthropicAccess {
            anthropic_key: "sk-ant".to_string(),
            anthropic_host: None,
            heli_key: Some("sk-heli".to_string()),
        };
        let endpoint = anthropic_endpoint(&access).unwrap();
        assert_eq!(endpoint.url, "https://anthropic.hconeai.com/v1/messages");
        assert_eq!(endpoint.headers["helicone-auth"], "Bearer sk-heli");
    }

    #[test]
    fn test_anthropic_requires_key_without_host() {
        let err = anthropic_endpoint(&AnthropicAccess::default()).unwrap_err();
        assert!(matches!(err, DispatchError::Prepare(_)));
    }

    #[test]
    fn test_build_url_gemini_stream() {
        let access = GeminiAccess {
            gemini_key: "AIza".to_string(),
            ..GeminiAccess::default()
        };
        let endpoint = gemini_endpoint(&access, "models/gemini-1.5-pro").unwrap();
        assert_eq!(
            endpoint.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:streamGenerateContent?alt=sse"
        );
        assert_eq!(endpoint.headers["x-goog-api-key"], "AIza");
    }

    #[test]
    fn test_gemini_model_id_is_one_escaped_segment() {
        let access = GeminiAccess {
            gemini_key: "AIza".to_string(),
            gemini_host: Some("https://gw.example/google/".to_string()),
            ..GeminiAccess::default()
        };
        let endpoint = gemini_endpoint(&access, "tuned/model?x=1").unwrap();
        assert_eq!(
            endpoint.url,
            "https://gw.example/google/v1beta/models/tuned%2Fmodel%3Fx=1:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn test_gemini_requires_key() {
        assert!(gemini_endpoint(&GeminiAccess::default(), "gemini-pro").is_err());
    }

    #[test]
    fn test_build_url_ollama_default_and_custom() {
        let endpoint = ollama_endpoint(&OllamaAccess::default()).unwrap();
        assert_eq!(endpoint.url, "http://127.0.0.1:11434/api/chat");
        assert!(endpoint.headers.is_empty());

        let endpoint = ollama_endpoint(&OllamaAccess {
            ollama_host: Some("gpu-box:11434".to_string()),
        })
        .unwrap();
        assert_eq!(endpoint.url, "http://gpu-box:11434/api/chat");
    }

    #[test]
    fn test_build_url_openai_with_org() {
        let access = OpenAiAccess {
            oai_key: "sk-test".to_string(),
            oai_org: Some("org-1".to_string()),
            ..OpenAiAccess::default()
        };
        let endpoint = openai_family_endpoint(Dialect::OpenAi, &access, "gpt-4o").unwrap();
        assert_eq!(endpoint.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(endpoint.headers["authorization"], "Bearer sk-test");
        assert_eq!(endpoint.headers["openai-organization"], "org-1");
    }

    #[test]
    fn test_build_url_azure_deployment() {
        let endpoint = openai_family_endpoint(
            Dialect::Azure,
            &oai("az-key", Some("my-res.openai.azure.com")),
            "gpt4-deploy",
        )
        .unwrap();
        assert_eq!(
            endpoint.url,
            "https://my-res.openai.azure.com/openai/deployments/gpt4-deploy/chat/completions?api-version=2023-07-01-preview"
        );
        assert_eq!(endpoint.headers["api-key"], "az-key");
        assert!(endpoint.headers.get("authorization").is_none());
    }

    #[test]
    fn test_azure_deployment_is_one_escaped_segment() {
        let endpoint = openai_family_endpoint(
            Dialect::Azure,
            &oai("az-key", Some("my-res.openai.azure.com")),
            "team a/gpt4?v=2",
        )
        .unwrap();
        assert_eq!(
            endpoint.url,
            "https://my-res.openai.azure.com/openai/deployments/team%20a%2Fgpt4%3Fv=2/chat/completions?api-version=2023-07-01-preview"
        );
        assert!(openai_family_endpoint(
            Dialect::Azure,
            &oai("az-key", Some("my-res.openai.azure.com")),
            "  "
        )
        .is_err());
    }

    #[test]
    fn test_azure_requires_host_and_key() {
        assert!(openai_family_endpoint(Dialect::Azure, &oai("k", None), "d").is_err());
        assert!(openai_family_endpoint(Dialect::Azure, &oai("", Some("h.example")), "d").is_err());
    }

    #[test]
    fn test_build_url_perplexity_has_no_version_prefix() {
        let endpoint =
            openai_family_endpoint(Dialect::Perplexity, &oai("pplx", None), "sonar").unwrap();
        assert_eq!(endpoint.url, "https://api.perplexity.ai/chat/completions");
    }

    #[test]
    fn test_openrouter_adds_attribution_headers() {
        let endpoint =
            openai_family_endpoint(Dialect::OpenRouter, &oai("or-key", None), "x").unwrap();
        assert_eq!(endpoint.url, "https://openrouter.ai/api/v1/chat/completions");
        assert_eq!(endpoint.headers["x-title"], OPENROUTER_TITLE);
        assert!(endpoint.headers.contains_key("http-referer"));
    }

    #[test]
    fn test_local_vendors_do_not_require_key() {
        let endpoint =
            openai_family_endpoint(Dialect::LmStudio, &OpenAiAccess::default(), "local").unwrap();
        assert_eq!(endpoint.url, "http://localhost:1234/v1/chat/completions");
        assert!(endpoint.headers.get("authorization").is_none());
    }

    #[test]
    fn test_hosted_vendors_require_key() {
        let err = openai_family_endpoint(Dialect::Groq, &OpenAiAccess::default(), "llama")
            .unwrap_err();
        assert!(err.to_string().contains("Groq"));
    }

    #[test]
    fn test_invalid_key_characters_are_prepare_error() {
        let err = openai_family_endpoint(Dialect::OpenAi, &oai("bad\nkey", None), "gpt").unwrap_err();
        assert!(matches!(err, DispatchError::Prepare(_)));
    }
}
