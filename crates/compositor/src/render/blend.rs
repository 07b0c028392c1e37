//! Blend modes, as GLSL for the layer footer and as a CPU reference.
//!
//! Colours are straight (non-premultiplied) RGBA. The CPU functions mirror
//! the GLSL line for line so the semantics can be unit tested.
use std::fmt::Write;

use crate::layer::BlendMode;

pub type Rgba = [f32; 4];

/// `#define gBlend<Name> <code>` for every mode.
pub(crate) fn glsl_defines() -> String {
    let mut defines = String::new();
    for mode in BlendMode::ALL {
        let _ = writeln!(defines, "#define {} {}", mode.glsl_define(), mode.code());
    }
    defines
}

pub(crate) const HASH_GLSL: &str = "\
float gHash(vec2 p) {
    return fract(sin(dot(p, vec2(12.9898, 78.233))) * 43758.5453);
}
";

pub(crate) const BLEND_GLSL: &str = "\
float gLuminance(vec3 c) {
    return dot(c, vec3(0.3, 0.59, 0.11));
}
float gColorBurn(float s, float d) {
    if (d >= 1.0) return 1.0;
    if (s <= 0.0) return 0.0;
    return 1.0 - min(1.0, (1.0 - d) / s);
}
float gColorDodge(float s, float d) {
    if (d <= 0.0) return 0.0;
    if (s >= 1.0) return 1.0;
    return min(1.0, d / (1.0 - s));
}
float gSoftLight(float s, float d) {
    if (s <= 0.5) return d - (1.0 - 2.0 * s) * d * (1.0 - d);
    float e = d <= 0.25 ? ((16.0 * d - 12.0) * d + 4.0) * d : sqrt(d);
    return d + (2.0 * s - 1.0) * (e - d);
}
float gHardLight(float s, float d) {
    return s <= 0.5 ? 2.0 * s * d : 1.0 - 2.0 * (1.0 - s) * (1.0 - d);
}
float gVividLight(float s, float d) {
    return s <= 0.5 ? gColorBurn(2.0 * s, d) : gColorDodge(2.0 * (s - 0.5), d);
}
float gPinLight(float s, float d) {
    return s <= 0.5 ? min(d, 2.0 * s) : max(d, 2.0 * (s - 0.5));
}
float gDivide(float s, float d) {
    return s <= 0.0 ? (d > 0.0 ? 1.0 : 0.0) : min(1.0, d / s);
}
float gBlendChannel(int mode, float s, float d) {
    if (mode == gBlendDarken) return min(s, d);
    if (mode == gBlendMultiply) return s * d;
    if (mode == gBlendColorBurn) return gColorBurn(s, d);
    if (mode == gBlendLinearBurn) return max(s + d - 1.0, 0.0);
    if (mode == gBlendLighten) return max(s, d);
    if (mode == gBlendScreen) return s + d - s * d;
    if (mode == gBlendColorDodge) return gColorDodge(s, d);
    if (mode == gBlendLinearDodge) return min(s + d, 1.0);
    if (mode == gBlendOverlay) return gHardLight(d, s);
    if (mode == gBlendSoftLight) return gSoftLight(s, d);
    if (mode == gBlendHardLight) return gHardLight(s, d);
    if (mode == gBlendVividLight) return gVividLight(s, d);
    if (mode == gBlendLinearLight) return clamp(d + 2.0 * s - 1.0, 0.0, 1.0);
    if (mode == gBlendPinLight) return gPinLight(s, d);
    if (mode == gBlendHardMix) return gVividLight(s, d) < 0.5 ? 0.0 : 1.0;
    if (mode == gBlendDifference) return abs(d - s);
    if (mode == gBlendExclusion) return s + d - 2.0 * s * d;
    if (mode == gBlendSubtract) return max(d - s, 0.0);
    if (mode == gBlendDivide) return gDivide(s, d);
    return s;
}
vec3 gBlendColor(int mode, vec3 s, vec3 d) {
    if (mode == gBlendDarkerColor) return gLuminance(s) < gLuminance(d) ? s : d;
    if (mode == gBlendLighterColor) return gLuminance(s) > gLuminance(d) ? s : d;
    return vec3(gBlendChannel(mode, s.r, d.r), gBlendChannel(mode, s.g, d.g), gBlendChannel(mode, s.b, d.b));
}
vec4 gBlend(vec4 source, vec4 destination, int mode, float opacity) {
    float sourceAlpha = clamp(source.a * opacity, 0.0, 1.0);
    if (mode == gBlendPassThrough || mode == gBlendOverwrite) return vec4(source.rgb, sourceAlpha);
    if (mode == gBlendMask) return vec4(destination.rgb, min(destination.a, sourceAlpha));
    if (mode == gBlendNone) return destination;
    if (mode == gBlendDissolve) return gHash(gl_FragCoord.xy) < sourceAlpha ? vec4(source.rgb, 1.0) : destination;
    float alpha = sourceAlpha + destination.a * (1.0 - sourceAlpha);
    if (alpha <= 0.0) return vec4(0.0);
    vec3 blended = clamp(gBlendColor(mode, source.rgb, destination.rgb), 0.0, 1.0);
    vec3 below = destination.rgb * destination.a * (1.0 - sourceAlpha);
    vec3 straight = (source.rgb * sourceAlpha + below) / alpha;
    vec3 aware = (blended * sourceAlpha + below) / alpha;
    return vec4(mix(straight, aware, destination.a), alpha);
}
";

pub fn hash(x: f32, y: f32) -> f32 {
    let v = ((x * 12.9898 + y * 78.233).sin() * 43758.5453).fract();
    if v < 0.0 {
        v + 1.0
    } else {
        v
    }
}

fn luminance(c: [f32; 3]) -> f32 {
    c[0] * 0.3 + c[1] * 0.59 + c[2] * 0.11
}

fn color_burn(s: f32, d: f32) -> f32 {
    if d >= 1.0 {
        1.0
    } else if s <= 0.0 {
        0.0
    } else {
        1.0 - (1.0f32).min((1.0 - d) / s)
    }
}

fn color_dodge(s: f32, d: f32) -> f32 {
    if d <= 0.0 {
        0.0
    } else if s >= 1.0 {
        1.0
    } else {
        (1.0f32).min(d / (1.0 - s))
    }
}

fn hard_light(s: f32, d: f32) -> f32 {
    if s <= 0.5 {
        2.0 * s * d
    } else {
        1.0 - 2.0 * (1.0 - s) * (1.0 - d)
    }
}

fn soft_light(s: f32, d: f32) -> f32 {
    if s <= 0.5 {
        return d - (1.0 - 2.0 * s) * d * (1.0 - d);
    }
    let e = if d <= 0.25 {
        ((16.0 * d - 12.0) * d + 4.0) * d
    } else {
        d.sqrt()
    };
    d + (2.0 * s - 1.0) * (e - d)
}

fn vivid_light(s: f32, d: f32) -> f32 {
    if s <= 0.5 {
        color_burn(2.0 * s, d)
    } else {
        color_dodge(2.0 * (s - 0.5), d)
    }
}

fn channel(mode: BlendMode, s: f32, d: f32) -> f32 {
    match mode {
        BlendMode::Darken => s.min(d),
        BlendMode::Multiply => s * d,
        BlendMode::ColorBurn => color_burn(s, d),
        BlendMode::LinearBurn => (s + d - 1.0).max(0.0),
        BlendMode::Lighten => s.max(d),
        BlendMode::Screen => s + d - s * d,
        BlendMode::ColorDodge => color_dodge(s, d),
        BlendMode::LinearDodge => (s + d).min(1.0),
        BlendMode::Overlay => hard_light(d, s),
        BlendMode::SoftLight => soft_light(s, d),
        BlendMode::HardLight => hard_light(s, d),
        BlendMode::VividLight => vivid_light(s, d),
        BlendMode::LinearLight => (d + 2.0 * s - 1.0).clamp(0.0, 1.0),
        BlendMode::PinLight => {
            if s <= 0.5 {
                d.min(2.0 * s)
            } else {
                d.max(2.0 * (s - 0.5))
            }
        }
        BlendMode::HardMix => {
            if vivid_light(s, d) < 0.5 {
                0.0
            } else {
                1.0
            }
        }
        BlendMode::Difference => (d - s).abs(),
        BlendMode::Exclusion => s + d - 2.0 * s * d,
        BlendMode::Subtract => (d - s).max(0.0),
        BlendMode::Divide => {
            if s <= 0.0 {
                if d > 0.0 {
                    1.0
                } else {
                    0.0
                }
            } else {
                (d / s).min(1.0)
            }
        }
        _ => s,
    }
}

/// Per-channel blend of the colour components only.
pub fn blend_color(mode: BlendMode, s: [f32; 3], d: [f32; 3]) -> [f32; 3] {
    match mode {
        BlendMode::DarkerColor => {
            if luminance(s) < luminance(d) {
                s
            } else {
                d
            }
        }
        BlendMode::LighterColor => {
            if luminance(s) > luminance(d) {
                s
            } else {
                d
            }
        }
        _ => std::array::from_fn(|i| channel(mode, s[i], d[i])),
    }
}

/// Composites `source` over `destination` the way the layer footer does.
/// `frag_coord` only matters for [`BlendMode::Dissolve`].
pub fn blend(source: Rgba, destination: Rgba, mode: BlendMode, opacity: f32, frag_coord: [f32; 2]) -> Rgba {
    let source_alpha = (source[3] * opacity).clamp(0.0, 1.0);
    let [sr, sg, sb, _] = source;
    let [dr, dg, db, da] = destination;
    match mode {
        BlendMode::PassThrough | BlendMode::Overwrite => return [sr, sg, sb, source_alpha],
        BlendMode::Mask => return [dr, dg, db, da.min(source_alpha)],
        BlendMode::None => return destination,
        BlendMode::Dissolve => {
            return if hash(frag_coord[0], frag_coord[1]) < source_alpha {
                [sr, sg, sb, 1.0]
            } else {
                destination
            };
        }
        _ => {}
    }

    let alpha = source_alpha + da * (1.0 - source_alpha);
    if alpha <= 0.0 {
        return [0.0; 4];
    }
    let blended = blend_color(mode, [sr, sg, sb], [dr, dg, db]).map(|c| c.clamp(0.0, 1.0));
    let src = [sr, sg, sb];
    let dst = [dr, dg, db];
    let color: [f32; 3] = std::array::from_fn(|i| {
        let below = dst[i] * da * (1.0 - source_alpha);
        let straight = (src[i] * source_alpha + below) / alpha;
        let aware = (blended[i] * source_alpha + below) / alpha;
        straight + (aware - straight) * da
    });
    [color[0], color[1], color[2], alpha]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Rgba, b: Rgba) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn mask_clamps_destination_alpha_only() {
        let out = blend([1.0, 0.0, 0.0, 0.3], [0.2, 0.4, 0.6, 0.8], BlendMode::Mask, 1.0, [0.0; 2]);
        assert!(close(out, [0.2, 0.4, 0.6, 0.3]));
    }

    #[test]
    fn normal_over_transparent_keeps_source_colour() {
        let out = blend([0.5, 0.25, 1.0, 0.5], [0.0; 4], BlendMode::Normal, 1.0, [0.0; 2]);
        assert!(close(out, [0.5, 0.25, 1.0, 0.5]));
    }

    #[test]
    fn multiply_over_opaque_uses_blended_colour() {
        let out = blend([0.5, 0.5, 0.5, 1.0], [0.5, 1.0, 0.0, 1.0], BlendMode::Multiply, 1.0, [0.0; 2]);
        assert!(close(out, [0.25, 0.5, 0.0, 1.0]));
        let half = blend([0.5, 0.5, 0.5, 1.0], [0.5, 1.0, 0.0, 1.0], BlendMode::Multiply, 0.5, [0.0; 2]);
        assert!(close(half, [0.375, 0.75, 0.0, 1.0]));
    }

    #[test]
    fn none_and_overwrite_bypass_blending() {
        let src = [1.0, 1.0, 1.0, 0.5];
        let dst = [0.1, 0.2, 0.3, 1.0];
        assert_eq!(blend(src, dst, BlendMode::None, 1.0, [0.0; 2]), dst);
        assert!(close(blend(src, dst, BlendMode::Overwrite, 0.5, [0.0; 2]), [1.0, 1.0, 1.0, 0.25]));
    }

    #[test]
    fn dissolve_is_all_or_nothing() {
        let src = [1.0, 0.0, 0.0, 0.5];
        let dst = [0.0, 0.0, 1.0, 1.0];
        let mut picked_source = 0;
        for y in 0..16 {
            for x in 0..16 {
                let out = blend(src, dst, BlendMode::Dissolve, 1.0, [x as f32 + 0.5, y as f32 + 0.5]);
                if out == [1.0, 0.0, 0.0, 1.0] {
                    picked_source += 1;
                } else {
                    assert_eq!(out, dst);
                }
            }
        }
        assert!(picked_source > 0 && picked_source < 256);
    }

    #[test]
    fn glsl_defines_cover_every_mode() {
        let defines = glsl_defines();
        assert_eq!(defines.lines().count(), BlendMode::ALL.len());
        assert!(defines.contains("#define gBlendDivide 26"));
        for mode in BlendMode::ALL {
            if !matches!(mode, BlendMode::Normal) {
                assert!(
                    BLEND_GLSL.contains(&mode.glsl_define()),
                    "{} missing from GLSL",
                    mode.name()
                );
            }
        }
    }
}
