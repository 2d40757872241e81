//! Validation of client requests into synthesis jobs.
//!
//! Everything here runs before the inference gate is touched, so a malformed
//! request never queues behind in-flight synthesis.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tts_core::{
    CustomModelSize, ReferenceAudio, RequestMode, SamplingParams, SynthesisJob, TtsError,
    TtsRequest, TtsResult, VoiceMode,
};

use audio_codec::decode_wav;

/// Server-side defaults applied to fields a request leaves out.
#[derive(Debug, Clone, Copy)]
pub struct RequestDefaults<'a> {
    /// The only backend this server runs.
    pub backend: &'a str,
    pub speaker: &'a str,
    pub custom_model_size: CustomModelSize,
}

/// Validate a request and resolve it to a job.
pub fn validate_request(
    request: TtsRequest,
    request_id: u64,
    defaults: &RequestDefaults<'_>,
) -> TtsResult<SynthesisJob> {
    if let Some(backend) = non_empty(request.backend.as_deref()) {
        if !backend.eq_ignore_ascii_case(defaults.backend) {
            return Err(TtsError::invalid_request(format!(
                "Only {} backend is supported",
                defaults.backend
            )));
        }
    }

    if request.text.trim().is_empty() {
        return Err(TtsError::invalid_request("text must not be empty"));
    }

    let speed = resolve_speed(request.speed)?;
    let speaker = non_empty(request.speaker.as_deref())
        .unwrap_or(defaults.speaker)
        .to_string();

    let voice = match request.mode {
        RequestMode::Default | RequestMode::Custom => {
            let size = match non_empty(request.custom_model_size.as_deref()) {
                Some(raw) => raw
                    .parse::<CustomModelSize>()
                    .map_err(TtsError::invalid_request)?,
                None => defaults.custom_model_size,
            };
            VoiceMode::Custom { size, speaker }
        }
        RequestMode::Design => {
            let instruction = non_empty(request.instruction.as_deref())
                .ok_or_else(|| {
                    TtsError::invalid_request("instruction is required for voice design")
                })?
                .to_string();
            VoiceMode::Design {
                instruction,
                speaker,
            }
        }
        RequestMode::Clone => {
            let encoded = non_empty(request.ref_audio_b64.as_deref()).ok_or_else(|| {
                TtsError::invalid_request("ref_audio_b64 is required for voice cloning")
            })?;
            let ref_text = non_empty(request.ref_text.as_deref())
                .ok_or_else(|| {
                    TtsError::invalid_request("ref_text is required for voice cloning")
                })?
                .to_string();
            let reference = decode_reference(encoded)?;
            VoiceMode::Clone {
                reference,
                ref_text,
                speaker,
            }
        }
    };

    Ok(SynthesisJob {
        request_id,
        text: request.text,
        voice,
        speed,
        sampling: SamplingParams {
            temperature: request.temperature,
            top_p: request.top_p,
            top_k: request.top_k,
            max_tokens: request.max_new_tokens,
        },
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Accepted speaking-rate multipliers.
pub const SPEED_RANGE: std::ops::RangeInclusive<f32> = 0.25..=4.0;

/// Zero means "unspecified" and becomes 1.0.
fn resolve_speed(speed: f32) -> TtsResult<f32> {
    if speed == 0.0 {
        return Ok(1.0);
    }
    if !SPEED_RANGE.contains(&speed) {
        return Err(TtsError::invalid_request(format!(
            "speed must be between {} and {}",
            SPEED_RANGE.start(),
            SPEED_RANGE.end()
        )));
    }
    Ok(speed)
}

/// Strip an optional `data:` URL prefix and decode base64 text.
pub fn decode_base64_audio(encoded: &str) -> TtsResult<Vec<u8>> {
    let payload = match encoded.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(rest, |(_, data)| data),
        None => encoded,
    };
    STANDARD
        .decode(payload.trim())
        .map_err(|e| TtsError::invalid_request(format!("ref_audio_b64 is not valid base64: {e}")))
}

fn decode_reference(encoded: &str) -> TtsResult<ReferenceAudio> {
    let bytes = decode_base64_audio(encoded)?;
    let reference = decode_wav(&bytes)?;
    if reference.samples.is_empty() {
        return Err(TtsError::invalid_request("ref_audio_b64 contains no audio"));
    }
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_codec::encode_wav;
    use tts_core::ModelRole;

    const DEFAULTS: RequestDefaults<'static> = RequestDefaults {
        backend: "tone",
        speaker: "Vivian",
        custom_model_size: CustomModelSize::Small,
    };

    fn wav_b64() -> String {
        let wav = encode_wav(&[0.1, -0.1, 0.2, -0.2], 16000).unwrap();
        STANDARD.encode(wav)
    }

    fn invalid_message(request: TtsRequest) -> String {
        match validate_request(request, 1, &DEFAULTS) {
            Err(TtsError::InvalidRequest(msg)) => msg,
            other => panic!("expected invalid request, got {other:?}"),
        }
    }

    #[test]
    fn test_default_mode_uses_defaults() {
        let job = validate_request(TtsRequest::new("Hello"), 7, &DEFAULTS).unwrap();
        assert_eq!(job.request_id, 7);
        assert_eq!(job.role(), ModelRole::CustomSmall);
        assert_eq!(job.voice.speaker(), "Vivian");
        assert_eq!(job.speed, 1.0);
    }

    #[test]
    fn test_custom_size_selects_large_model() {
        let request = TtsRequest::new("Hello")
            .with_mode(RequestMode::Custom)
            .with_custom_model_size(" 1.7B ")
            .with_speaker("Ryan");
        let job = validate_request(request, 1, &DEFAULTS).unwrap();
        assert_eq!(job.role(), ModelRole::CustomLarge);
        assert_eq!(job.voice.speaker(), "Ryan");
    }

    #[test]
    fn test_bad_custom_size() {
        let request = TtsRequest::new("Hello").with_custom_model_size("3b");
        assert_eq!(
            invalid_message(request),
            "custom_model_size must be 0.6b or 1.7b"
        );
    }

    #[test]
    fn test_design_requires_instruction() {
        let request = TtsRequest::new("Hello").with_mode(RequestMode::Design);
        assert_eq!(
            invalid_message(request),
            "instruction is required for voice design"
        );

        let request = TtsRequest::new("Hello")
            .with_mode(RequestMode::Design)
            .with_instruction("warm and slow");
        let job = validate_request(request, 1, &DEFAULTS).unwrap();
        assert_eq!(job.role(), ModelRole::Design);
    }

    #[test]
    fn test_clone_requires_reference_and_transcript() {
        let request = TtsRequest::new("Hello").with_mode(RequestMode::Clone);
        assert_eq!(
            invalid_message(request),
            "ref_audio_b64 is required for voice cloning"
        );

        let mut request = TtsRequest::new("Hello").with_mode(RequestMode::Clone);
        request.ref_audio_b64 = Some(wav_b64());
        assert_eq!(
            invalid_message(request),
            "ref_text is required for voice cloning"
        );
    }

    #[test]
    fn test_clone_decodes_data_url() {
        let request = TtsRequest::new("Hello")
            .with_mode(RequestMode::Clone)
            .with_reference(format!("data:audio/wav;base64,{}", wav_b64()), "hi there");
        let job = validate_request(request, 1, &DEFAULTS).unwrap();
        match job.voice {
            VoiceMode::Clone {
                reference,
                ref_text,
                ..
            } => {
                assert_eq!(reference.sample_rate, 16000);
                assert_eq!(reference.samples.len(), 4);
                assert_eq!(ref_text, "hi there");
            }
            other => panic!("unexpected voice {other:?}"),
        }
    }

    #[test]
    fn test_clone_rejects_bad_audio() {
        let request = TtsRequest::new("Hello")
            .with_mode(RequestMode::Clone)
            .with_reference("!!not base64!!", "hi");
        assert!(invalid_message(request).contains("not valid base64"));

        let request = TtsRequest::new("Hello")
            .with_mode(RequestMode::Clone)
            .with_reference(STANDARD.encode(b"plain bytes"), "hi");
        assert!(invalid_message(request).contains("invalid WAV"));
    }

    #[test]
    fn test_backend_and_text_checks() {
        let mut request = TtsRequest::new("Hello");
        request.backend = Some("mlx".to_string());
        assert_eq!(invalid_message(request), "Only tone backend is supported");

        assert_eq!(
            invalid_message(TtsRequest::new("   ")),
            "text must not be empty"
        );

        let mut request = TtsRequest::new("Hello");
        request.speed = -1.0;
        assert!(invalid_message(request).contains("speed"));
    }

    #[test]
    fn test_speed_outside_range_is_rejected() {
        for speed in [0.000_000_001, 0.1, 4.5, f32::INFINITY, f32::NAN] {
            let mut request = TtsRequest::new("Hello");
            request.speed = speed;
            assert_eq!(
                invalid_message(request),
                "speed must be between 0.25 and 4"
            );
        }

        for speed in [0.25, 1.5, 4.0] {
            let mut request = TtsRequest::new("Hello");
            request.speed = speed;
            let job = validate_request(request, 1, &DEFAULTS).unwrap();
            assert_eq!(job.speed, speed);
        }
    }

    #[test]
    fn test_sampling_fields_pass_through() {
        let mut request = TtsRequest::new("Hello");
        request.temperature = Some(0.7);
        request.max_new_tokens = Some(256);
        let job = validate_request(request, 1, &DEFAULTS).unwrap();
        assert_eq!(job.sampling.temperature, Some(0.7));
        assert_eq!(job.sampling.max_tokens, Some(256));
        assert_eq!(job.sampling.top_p, None);
    }
}
