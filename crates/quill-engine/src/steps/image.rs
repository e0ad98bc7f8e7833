//! The image generator: resolves `{{image+prompt}}` markers into generated
//! image URLs. All or nothing; the draft text itself is never touched.

use serde_json::json;
use tracing::{info, warn};

use quill_core::{
    ErrorInfo, ErrorKind, GeneratedImage, PromptSpec, RunState, StepId, StepStatus,
};

use crate::context::StepContext;
use crate::placeholder::image_prompts;

pub async fn run(ctx: &StepContext, mut state: RunState) -> RunState {
    let prompts = image_prompts(&state.draft);

    let spec = PromptSpec {
        goal: format!("generate {} image(s) for the draft", prompts.len()),
        constraints: vec![
            "only {{image+...}} markers are processed".into(),
            "the draft text is never modified".into(),
        ],
        materials: Vec::new(),
        output_format: "generated image records (placeholder, prompt, url)".into(),
    };

    if prompts.is_empty() {
        state.record_step(
            StepId::Image,
            StepStatus::Success,
            spec,
            Some(json!({"message": "no image placeholders"})),
            None,
        );
        return state;
    }

    let mut generated: Vec<GeneratedImage> = Vec::new();

    // Sequential on purpose, and all-or-nothing: a failure discards the
    // whole batch so the run never carries a partial image set.
    for prompt in prompts {
        if ctx.cancelled() {
            let error = ErrorInfo::new(ErrorKind::Cancelled, "run cancelled");
            state.record_step(StepId::Image, StepStatus::Fail, spec, None, Some(error));
            return state;
        }

        let urls = match ctx
            .gateway
            .generate_image(&ctx.config.models.image, &prompt)
            .await
        {
            Ok(urls) => urls,
            Err(e) => {
                warn!(error = %e, "image generation failed");
                let error = ErrorInfo::new(ErrorKind::GenerationFailed, e.to_string())
                    .with_guidance("check the image model configuration and retry");
                state.record_step(StepId::Image, StepStatus::Fail, spec, None, Some(error));
                return state;
            }
        };
        let url = match urls.into_iter().next() {
            Some(url) => url,
            None => {
                let error = ErrorInfo::new(
                    ErrorKind::GenerationFailed,
                    "image generation returned no URL",
                )
                .with_guidance("check the image model configuration and retry");
                state.record_step(StepId::Image, StepStatus::Fail, spec, None, Some(error));
                return state;
            }
        };

        generated.push(GeneratedImage {
            placeholder: format!("{{{{image+{}}}}}", prompt),
            prompt,
            url,
        });
    }

    info!(count = generated.len(), "image generation finished");
    let outcome = json!({
        "count": generated.len(),
        "urls": generated.iter().map(|g| g.url.clone()).collect::<Vec<_>>(),
    });

    state.images.extend(generated);
    let all_images = state.images.clone();
    state.variables.set_generated_images(&all_images);
    state.record_step(StepId::Image, StepStatus::Success, spec, Some(outcome), None);
    state
}
