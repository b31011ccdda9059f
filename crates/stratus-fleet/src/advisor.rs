/// Picks GPU hardware for a model when a deployment leaves the choice
/// to the control plane (`gpu_type` empty or "auto").
pub trait HardwareAdvisor: Send + Sync {
    fn optimal_config(&self, model_name: &str) -> (String, u32);
}

/// Size-class lookup: parameter count parsed from the model name, then
/// bucketed into hardware tiers.
pub struct SizeClassAdvisor;

impl SizeClassAdvisor {
    /// Parse a parameter count (in billions) out of names like
    /// "meta-llama/Llama-3-70b-instruct" or "qwen2.5-7b".
    fn param_billions(model_name: &str) -> Option<f64> {
        let lower = model_name.to_lowercase();
        let bytes = lower.as_bytes();
        let mut best: Option<f64> = None;

        for (i, _) in lower.match_indices('b') {
            // Walk back over the digits (and one decimal point)
            // preceding the 'b'.
            let mut start = i;
            let mut seen_dot = false;
            while start > 0 {
                let c = bytes[start - 1];
                if c.is_ascii_digit() {
                    start -= 1;
                } else if c == b'.' && !seen_dot {
                    seen_dot = true;
                    start -= 1;
                } else {
                    break;
                }
            }
            if start == i {
                continue;
            }
            // The size token must not sit inside a longer word
            // ("base" would otherwise parse nothing, but "13bit" would).
            if bytes.get(i + 1).map(|c| c.is_ascii_alphanumeric()).unwrap_or(false) {
                continue;
            }
            if let Ok(v) = lower[start..i].trim_start_matches('.').parse::<f64>() {
                best = Some(best.map_or(v, |b: f64| b.max(v)));
            }
        }
        best
    }
}

impl HardwareAdvisor for SizeClassAdvisor {
    fn optimal_config(&self, model_name: &str) -> (String, u32) {
        let Some(billions) = Self::param_billions(model_name) else {
            // Unknown size: a single A100 is the safe middle ground.
            return ("A100".to_string(), 1);
        };

        if billions < 14.0 {
            ("A10G".to_string(), 1)
        } else if billions < 70.0 {
            ("A100".to_string(), 1)
        } else if billions < 200.0 {
            ("H100".to_string(), 4)
        } else {
            ("H100".to_string(), 8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_classes() {
        let advisor = SizeClassAdvisor;
        assert_eq!(advisor.optimal_config("qwen2.5-7b"), ("A10G".to_string(), 1));
        assert_eq!(
            advisor.optimal_config("meta-llama/Llama-2-13b-chat-hf"),
            ("A10G".to_string(), 1)
        );
        assert_eq!(
            advisor.optimal_config("deepseek-ai/deepseek-llm-67b-chat"),
            ("A100".to_string(), 1)
        );
        assert_eq!(
            advisor.optimal_config("meta-llama/Llama-3-70b-instruct"),
            ("H100".to_string(), 4)
        );
        assert_eq!(
            advisor.optimal_config("meta-llama/Llama-3-405b-instruct"),
            ("H100".to_string(), 8)
        );
    }

    #[test]
    fn test_unknown_size_defaults_to_a100() {
        let advisor = SizeClassAdvisor;
        assert_eq!(advisor.optimal_config("mystery-model"), ("A100".to_string(), 1));
    }
}
