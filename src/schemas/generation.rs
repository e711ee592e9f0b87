use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{check_range, check_url, ValidationErrors};
use crate::generations::repo_types::GenerationKind;

pub const PROMPT_MIN: usize = 10;
pub const PROMPT_MAX: usize = 2000;

pub const DURATION_RANGE: (i64, i64) = (1, 10);
pub const FPS_RANGE: (i64, i64) = (12, 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[serde(rename = "720p")]
    P720,
    #[serde(rename = "1080p")]
    P1080,
}

impl Resolution {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "720p" => Some(Self::P720),
            "1080p" => Some(Self::P1080),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::P720 => "720p",
            Self::P1080 => "1080p",
        }
    }
}

/// Normalized video settings: every field present and in range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoSettings {
    pub duration: u32,
    pub fps: u32,
    pub resolution: Resolution,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            duration: 5,
            fps: 24,
            resolution: Resolution::P720,
        }
    }
}

impl VideoSettings {
    pub fn num_frames(&self) -> u32 {
        self.duration * self.fps
    }
}

/// Raw create-generation payload. Every field is kept as untyped JSON so that
/// a wrong type is reported with the other violations instead of failing
/// JSON decoding.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateGenerationInput {
    #[serde(rename = "type", default)]
    pub kind: Option<Value>,
    #[serde(default)]
    pub prompt: Option<Value>,
    #[serde(default)]
    pub image_url: Option<Value>,
    #[serde(default)]
    pub settings: Option<Value>,
}

/// A create-generation request that passed validation, with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidGeneration {
    #[serde(rename = "type")]
    pub kind: GenerationKind,
    pub prompt: String,
    pub image_url: Option<String>,
    pub settings: VideoSettings,
}

enum Field<T> {
    Missing,
    Present(T),
    /// Wrong JSON type; already recorded.
    Invalid,
}

fn string_field(errs: &mut ValidationErrors, path: &str, raw: Option<&Value>) -> Field<String> {
    match raw {
        None | Some(Value::Null) => Field::Missing,
        Some(Value::String(s)) => Field::Present(s.clone()),
        Some(_) => {
            errs.add(path, "type", "Expected string");
            Field::Invalid
        }
    }
}

fn integer_field(errs: &mut ValidationErrors, path: &str, raw: Option<&Value>) -> Field<i64> {
    match raw {
        None | Some(Value::Null) => Field::Missing,
        Some(v) => match v.as_i64() {
            Some(n) => Field::Present(n),
            None => {
                errs.add(path, "type", "Expected integer");
                Field::Invalid
            }
        },
    }
}

impl CreateGenerationInput {
    pub fn validate(self) -> Result<ValidGeneration, ValidationErrors> {
        let mut errs = ValidationErrors::new();

        let kind = match string_field(&mut errs, "type", self.kind.as_ref()) {
            Field::Missing => {
                errs.add("type", "required", "Required");
                None
            }
            Field::Invalid => None,
            Field::Present(raw) => match raw.parse::<GenerationKind>() {
                Ok(kind) => Some(kind),
                Err(_) => {
                    errs.add(
                        "type",
                        "enum",
                        "Expected 'text_to_video' | 'image_to_video'",
                    );
                    None
                }
            },
        };

        let prompt = match string_field(&mut errs, "prompt", self.prompt.as_ref()) {
            Field::Missing => {
                errs.add("prompt", "required", "Required");
                String::new()
            }
            Field::Invalid => String::new(),
            Field::Present(prompt) => {
                let len = prompt.chars().count();
                if len < PROMPT_MIN {
                    errs.add(
                        "prompt",
                        "min_length",
                        format!("Prompt must be at least {PROMPT_MIN} characters"),
                    );
                } else if len > PROMPT_MAX {
                    errs.add("prompt", "max_length", "Prompt too long");
                }
                prompt
            }
        };

        let image_url = match string_field(&mut errs, "image_url", self.image_url.as_ref()) {
            Field::Present(url) => {
                check_url(&mut errs, "image_url", &url);
                Some(url)
            }
            Field::Missing | Field::Invalid => None,
        };

        let settings = normalize_settings(self.settings.as_ref(), &mut errs);

        match (kind, errs.is_empty()) {
            (Some(kind), true) => Ok(ValidGeneration {
                kind,
                prompt,
                image_url,
                settings,
            }),
            _ => Err(errs),
        }
    }
}

fn normalize_settings(raw: Option<&Value>, errs: &mut ValidationErrors) -> VideoSettings {
    let defaults = VideoSettings::default();
    let obj = match raw {
        None | Some(Value::Null) => return defaults,
        Some(Value::Object(obj)) => obj,
        Some(_) => {
            errs.add("settings", "type", "Expected object");
            return defaults;
        }
    };

    let duration = match integer_field(errs, "settings.duration", obj.get("duration")) {
        Field::Present(d) => {
            check_range(errs, "settings.duration", d, DURATION_RANGE.0, DURATION_RANGE.1);
            d
        }
        Field::Missing | Field::Invalid => i64::from(defaults.duration),
    };

    let fps = match integer_field(errs, "settings.fps", obj.get("fps")) {
        Field::Present(f) => {
            check_range(errs, "settings.fps", f, FPS_RANGE.0, FPS_RANGE.1);
            f
        }
        Field::Missing | Field::Invalid => i64::from(defaults.fps),
    };

    let resolution = match string_field(errs, "settings.resolution", obj.get("resolution")) {
        Field::Present(r) => Resolution::parse(&r).unwrap_or_else(|| {
            errs.add("settings.resolution", "enum", "Expected '720p' | '1080p'");
            defaults.resolution
        }),
        Field::Missing | Field::Invalid => defaults.resolution,
    };

    // Out-of-range values already produced an error above; the fallback is
    // never returned to a caller.
    VideoSettings {
        duration: u32::try_from(duration).unwrap_or(defaults.duration),
        fps: u32::try_from(fps).unwrap_or(defaults.fps),
        resolution,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(kind: &str, prompt: &str) -> CreateGenerationInput {
        CreateGenerationInput {
            kind: Some(json!(kind)),
            prompt: Some(json!(prompt)),
            ..Default::default()
        }
    }

    fn with_settings(settings: Value) -> CreateGenerationInput {
        CreateGenerationInput {
            settings: Some(settings),
            ..input("text_to_video", "A cat astronaut floating in space")
        }
    }

    #[test]
    fn cat_astronaut_is_normalized_with_defaults() {
        let v = input("text_to_video", "A cat astronaut floating in space")
            .validate()
            .expect("valid input");
        assert_eq!(v.kind, GenerationKind::TextToVideo);
        assert_eq!(v.settings.duration, 5);
        assert_eq!(v.settings.fps, 24);
        assert_eq!(v.settings.resolution, Resolution::P720);
    }

    #[test]
    fn short_prompt_cites_prompt_length() {
        let errs = input("text_to_video", "short").validate().unwrap_err();
        let prompt: Vec<_> = errs.for_path("prompt").collect();
        assert_eq!(prompt.len(), 1);
        assert_eq!(prompt[0].rule, "min_length");
        assert_eq!(prompt[0].message, "Prompt must be at least 10 characters");
    }

    #[test]
    fn every_prompt_shorter_than_ten_fails() {
        for len in 0..PROMPT_MIN {
            let prompt = "a".repeat(len);
            let errs = input("text_to_video", &prompt).validate().unwrap_err();
            assert!(errs.has("prompt"), "len {len}");
        }
    }

    #[test]
    fn prompt_bounds_are_inclusive_for_both_kinds() {
        for kind in ["text_to_video", "image_to_video"] {
            for len in [PROMPT_MIN, 11, 500, PROMPT_MAX] {
                let prompt = "b".repeat(len);
                assert!(input(kind, &prompt).validate().is_ok(), "{kind} len {len}");
            }
        }
        let errs = input("text_to_video", &"b".repeat(PROMPT_MAX + 1))
            .validate()
            .unwrap_err();
        assert_eq!(errs.fields[0].message, "Prompt too long");
    }

    #[test]
    fn unknown_kinds_fail() {
        for kind in ["", "video", "TEXT_TO_VIDEO", "image_to_image"] {
            let errs = input(kind, "A perfectly fine prompt").validate().unwrap_err();
            assert!(errs.has("type"), "kind {kind:?}");
        }
    }

    #[test]
    fn missing_kind_and_prompt_are_both_reported() {
        let errs = CreateGenerationInput::default().validate().unwrap_err();
        assert!(errs.has("type"));
        assert!(errs.has("prompt"));
    }

    #[test]
    fn duration_bounds() {
        let dur = |d: i64| with_settings(json!({ "duration": d })).validate();
        assert!(dur(0).unwrap_err().has("settings.duration"));
        assert!(dur(11).unwrap_err().has("settings.duration"));
        assert_eq!(dur(1).unwrap().settings.duration, 1);
        assert_eq!(dur(10).unwrap().settings.duration, 10);
    }

    #[test]
    fn partial_settings_get_field_defaults() {
        let v = with_settings(json!({ "fps": 60 })).validate().unwrap();
        assert_eq!(v.settings.fps, 60);
        assert_eq!(v.settings.duration, 5);
        assert_eq!(v.settings.resolution, Resolution::P720);
    }

    #[test]
    fn all_settings_violations_are_enumerated() {
        let errs = CreateGenerationInput {
            image_url: Some(json!("nope")),
            settings: Some(json!({ "duration": 0, "fps": 120, "resolution": "4k" })),
            ..input("text_to_video", "tiny")
        }
        .validate()
        .unwrap_err();
        for path in [
            "prompt",
            "image_url",
            "settings.duration",
            "settings.fps",
            "settings.resolution",
        ] {
            assert!(errs.has(path), "missing {path}");
        }
    }

    #[test]
    fn wrong_types_are_violations_alongside_the_rest() {
        let raw = json!({
            "type": 5,
            "prompt": "short",
            "image_url": false,
            "settings": { "duration": 5.5, "fps": "24", "resolution": 720 }
        });
        let input: CreateGenerationInput = serde_json::from_value(raw).unwrap();
        let errs = input.validate().unwrap_err();
        for path in [
            "type",
            "image_url",
            "settings.duration",
            "settings.fps",
            "settings.resolution",
        ] {
            let rules: Vec<_> = errs.for_path(path).map(|f| f.rule).collect();
            assert_eq!(rules, vec!["type"], "{path}");
        }
        assert_eq!(errs.for_path("prompt").next().unwrap().rule, "min_length");
    }

    #[test]
    fn non_object_settings_is_a_type_violation() {
        let errs = with_settings(json!([5, 24])).validate().unwrap_err();
        assert_eq!(errs.for_path("settings").next().unwrap().rule, "type");
    }

    #[test]
    fn null_fields_count_as_absent() {
        let v = CreateGenerationInput {
            image_url: Some(Value::Null),
            settings: Some(json!({ "duration": null })),
            ..input("text_to_video", "A cat astronaut floating in space")
        }
        .validate()
        .unwrap();
        assert_eq!(v.image_url, None);
        assert_eq!(v.settings.duration, 5);
    }

    #[test]
    fn image_to_video_without_image_passes_the_schema() {
        let v = input("image_to_video", "Make the waves move gently")
            .validate()
            .unwrap();
        assert_eq!(v.kind, GenerationKind::ImageToVideo);
        assert_eq!(v.image_url, None);
    }

    #[test]
    fn decodes_wire_payload() {
        let raw = r#"{"type":"text_to_video","prompt":"A cat astronaut floating in space",
                      "settings":{"resolution":"1080p"}}"#;
        let input: CreateGenerationInput = serde_json::from_str(raw).unwrap();
        let v = input.validate().unwrap();
        assert_eq!(v.settings.resolution, Resolution::P1080);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["type"], "text_to_video");
        assert_eq!(json["settings"]["resolution"], "1080p");
    }
}
