use async_trait::async_trait;
use gencore::{seed, Step, StepContext, StepError, StepOutput, Value};
use genruntime::StepFactory;
use std::collections::HashMap;

/// Pure, deterministic prompt augmentation: joins the template's style
/// list onto the user prompt and passes the negative prompt through.
pub struct PromptEnhanceStep;

pub const PROMPT_ENHANCE: &str = "prompt.enhance";

#[async_trait]
impl Step for PromptEnhanceStep {
    fn step_type(&self) -> &str {
        PROMPT_ENHANCE
    }

    async fn execute(&self, ctx: StepContext) -> Result<StepOutput, StepError> {
        let base_prompt = ctx.require_str(seed::PROMPT)?;

        let styles: Vec<&str> = ctx
            .param("style_prompts")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let enhanced = if styles.is_empty() {
            base_prompt.to_string()
        } else {
            format!("{}, {}", base_prompt, styles.join(", "))
        };

        let negative = ctx
            .param("negative_prompt")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(StepOutput::new()
            .with("enhanced_prompt", enhanced)
            .with("negative_prompt", negative)
            .with("original_prompt", base_prompt))
    }
}

pub struct PromptEnhanceStepFactory;

impl StepFactory for PromptEnhanceStepFactory {
    fn step_type(&self) -> &str {
        PROMPT_ENHANCE
    }

    fn create(&self, _parameters: &HashMap<String, Value>) -> Result<Box<dyn Step>, StepError> {
        Ok(Box::new(PromptEnhanceStep))
    }
}
