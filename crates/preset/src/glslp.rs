//! libretro `.glslp` preset parsing
//!
//! A `.glslp` file is a flat list of `key = value` lines. Per-pass keys carry the
//! pass index as a suffix (`shader0`, `scale_type1`, ...). Keys this runtime has
//! no use for (shader parameters, lookup texture wrap modes) are ignored.

use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::PresetError;
use crate::preset::{AxisScale, FilterMode, PassDescriptor, PassScale, Preset, ScaleFactor, ScaleType, TargetFormat, TextureReference};

static LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^\s*(?<key>[A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?:"(?<quoted>[^"]*)"|(?<bare>[^#"]*?))\s*(?:#.*)?$"#).expect("valid regex"));

/// Parses `.glslp` content into a preset (not yet validated)
pub fn parse(content: &str) -> Result<Preset, PresetError> {
    let values = parse_key_values(content)?;
    let lookup = |key: &str| values.get(key).map(String::as_str);

    let count = required(&values, "shaders")?;
    let count: usize = count.parse().map_err(|_| invalid("shaders", count))?;

    let passes = (0..count).map(|index| parse_pass(&lookup, index)).collect::<Result<Vec<_>, _>>()?;

    let textures = match lookup("textures") {
        Some(list) => list
            .split(';')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| {
                Ok(TextureReference {
                    id: id.to_string(),
                    path: PathBuf::from(required(&values, id)?),
                })
            })
            .collect::<Result<Vec<_>, PresetError>>()?,
        None => Vec::new(),
    };

    Ok(Preset {
        passes,
        textures,
        aliases: Default::default(),
    })
}

fn parse_key_values(content: &str) -> Result<HashMap<String, String>, PresetError> {
    let mut values = HashMap::new();

    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
            continue;
        }

        let captures = LINE_RE.captures(line).ok_or_else(|| PresetError::Syntax {
            line: index + 1,
            message: format!("expected `key = value`, found {trimmed:?}"),
        })?;
        let value = captures.name("quoted").or_else(|| captures.name("bare")).map_or("", |m| m.as_str());

        // Later lines override earlier ones, like libretro's own loader
        values.insert(captures["key"].to_string(), value.to_string());
    }

    Ok(values)
}

fn parse_pass<'a>(lookup: &impl Fn(&str) -> Option<&'a str>, index: usize) -> Result<PassDescriptor, PresetError> {
    let key = |name: &str| format!("{name}{index}");

    let shader_key = key("shader");
    let shader = lookup(&shader_key).filter(|s| !s.is_empty()).ok_or(PresetError::MissingKey(shader_key))?;
    let mut pass = PassDescriptor::new(shader);

    let filter_key = key("filter_linear");
    if let Some(value) = lookup(&filter_key) {
        pass.filter = if parse_bool(&filter_key, value)? { FilterMode::Linear } else { FilterMode::Nearest };
    }

    pass.scale = parse_scale(lookup, index)?;

    let mod_key = key("frame_count_mod");
    if let Some(value) = lookup(&mod_key) {
        let cycle: u32 = value.parse().map_err(|_| invalid(&mod_key, value))?;
        // 0 disables the cycle
        pass.frame_count_mod = (cycle != 0).then_some(cycle);
    }

    pass.alias = lookup(&key("alias")).filter(|alias| !alias.is_empty()).map(str::to_string);

    let float_key = key("float_framebuffer");
    let srgb_key = key("srgb_framebuffer");
    if lookup(&float_key).map(|v| parse_bool(&float_key, v)).transpose()?.unwrap_or(false) {
        pass.format = TargetFormat::Rgba16Float;
    } else if lookup(&srgb_key).map(|v| parse_bool(&srgb_key, v)).transpose()?.unwrap_or(false) {
        pass.format = TargetFormat::Rgba8UnormSrgb;
    }

    Ok(pass)
}

fn parse_scale<'a>(lookup: &impl Fn(&str) -> Option<&'a str>, index: usize) -> Result<PassScale, PresetError> {
    let scale_type = |name: String| -> Result<Option<ScaleType>, PresetError> { lookup(&name).map(ScaleType::from_str).transpose() };
    let factor = |name: String| -> Result<Option<ScaleFactor>, PresetError> {
        lookup(&name)
            .map(|value| value.parse::<ScaleFactor>().map_err(|source| PresetError::InvalidScaleFactor { key: name.clone(), source }))
            .transpose()
    };

    let shared_type = scale_type(format!("scale_type{index}"))?;
    let shared_factor = factor(format!("scale{index}"))?;

    let axis = |axis: &str| -> Result<AxisScale, PresetError> {
        let kind = scale_type(format!("scale_type_{axis}{index}"))?.or(shared_type).unwrap_or_default();
        let factor = match factor(format!("scale_{axis}{index}"))?.or(shared_factor) {
            Some(factor) => factor,
            None if kind == ScaleType::Absolute => return Err(PresetError::MissingKey(format!("scale_{axis}{index}"))),
            None => ScaleFactor::ONE,
        };
        Ok(AxisScale { kind, factor })
    };

    Ok(PassScale { x: axis("x")?, y: axis("y")? })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, PresetError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn required<'a>(values: &'a HashMap<String, String>, key: &str) -> Result<&'a str, PresetError> {
    values.get(key).map(String::as_str).ok_or_else(|| PresetError::MissingKey(key.to_string()))
}

fn invalid(key: &str, value: &str) -> PresetError {
    PresetError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_pass_preset() {
        let content = r#"
# CRT-ish chain
shaders = 2

shader0 = "shaders/blur.wgsl"
filter_linear0 = false
scale_type0 = source
scale0 = 2.0
alias0 = Blurred
float_framebuffer0 = true
frame_count_mod0 = 8

shader1 = shaders/final.wgsl   # trailing comment
filter_linear1 = true
scale_type_x1 = viewport
scale_type_y1 = absolute
scale_y1 = 240

textures = "LUT;Mask"
LUT = textures/lut.png
Mask = "textures/mask.png"
"#;

        let preset = parse(content).unwrap();
        assert_eq!(preset.passes.len(), 2);

        let first = &preset.passes[0];
        assert_eq!(first.shader, PathBuf::from("shaders/blur.wgsl"));
        assert_eq!(first.filter, FilterMode::Nearest);
        assert_eq!(first.scale, PassScale::uniform(ScaleType::Input, ScaleFactor::new(2, 1)));
        assert_eq!(first.alias.as_deref(), Some("Blurred"));
        assert_eq!(first.format, TargetFormat::Rgba16Float);
        assert_eq!(first.frame_count_mod, Some(8));

        let second = &preset.passes[1];
        assert_eq!(second.shader, PathBuf::from("shaders/final.wgsl"));
        assert_eq!(second.filter, FilterMode::Linear);
        assert_eq!(second.scale.x.kind, ScaleType::Viewport);
        assert_eq!(second.scale.x.factor, ScaleFactor::ONE);
        assert_eq!(second.scale.y.kind, ScaleType::Absolute);
        assert_eq!(second.scale.y.factor, ScaleFactor::new(240, 1));

        let ids: Vec<_> = preset.textures.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["LUT", "Mask"]);
        assert_eq!(preset.textures[1].path, PathBuf::from("textures/mask.png"));
    }

    #[test]
    fn test_missing_keys() {
        assert!(matches!(parse("shader0 = a.wgsl"), Err(PresetError::MissingKey(key)) if key == "shaders"));
        assert!(matches!(parse("shaders = 2\nshader0 = a.wgsl"), Err(PresetError::MissingKey(key)) if key == "shader1"));
        assert!(matches!(
            parse("shaders = 1\nshader0 = a.wgsl\ntextures = LUT"),
            Err(PresetError::MissingKey(key)) if key == "LUT"
        ));
        assert!(matches!(
            parse("shaders = 1\nshader0 = a.wgsl\nscale_type0 = absolute"),
            Err(PresetError::MissingKey(key)) if key == "scale_x0"
        ));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(parse("shaders = 1\nshader0 = a.wgsl\nfilter_linear0 = maybe"), Err(PresetError::InvalidValue { .. })));
        assert!(matches!(parse("shaders = 1\nshader0 = a.wgsl\nscale_type0 = huge"), Err(PresetError::InvalidValue { .. })));
        assert!(matches!(parse("shaders = 1\nshader0 = a.wgsl\nscale0 = 1/0"), Err(PresetError::InvalidScaleFactor { .. })));
        assert!(matches!(parse("shaders = 1\nthis is not a pair"), Err(PresetError::Syntax { line: 2, .. })));
    }

    #[test]
    fn test_zero_frame_count_mod_disables_cycle() {
        let preset = parse("shaders = 1\nshader0 = a.wgsl\nframe_count_mod0 = 0").unwrap();
        assert_eq!(preset.passes[0].frame_count_mod, None);
    }

    #[test]
    fn test_glslp_and_yaml_agree() {
        let glslp = parse("shaders = 2\nshader0 = a.wgsl\nscale_type0 = source\nscale0 = 1/2\nalias0 = Half\nshader1 = b.wgsl\nfilter_linear1 = false").unwrap();
        let yaml = Preset::from_yaml(
            r#"
passes:
  - shader: a.wgsl
    scale: { type: input, factor: "1/2" }
    alias: Half
  - shader: b.wgsl
    filter: nearest
"#,
        )
        .unwrap();
        assert_eq!(glslp, yaml);
    }
}
