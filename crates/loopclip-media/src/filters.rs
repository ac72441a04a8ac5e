//! Filter chain composition for the encoder.
//!
//! The chain is derived purely from the job geometry and zoom setting and is
//! always assembled in the same order:
//! pixel format → crop-or-pad → zoom → final scale.
//! Zoom runs on the already reframed picture and the trailing scale pins the
//! exact output size whatever rounding zoompan introduced.

use std::fmt;

use loopclip_models::{JobDescriptor, ZOOM_SCALE};

/// Pixel format every rendered clip is normalized to.
pub const PIXEL_FORMAT: &str = "yuv420p";

/// Per-frame zoom rate at |zoom| = 100.
pub const MAX_ZOOM_RATE: f64 = 0.1;

/// Zooming in stops at this magnification.
pub const ZOOM_CEILING: f64 = 2.0;

/// Zooming out stops at the original scale.
pub const ZOOM_FLOOR: f64 = 1.0;

/// Inputs to [`compose`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposeParams {
    pub input_width: u32,
    pub input_height: u32,
    pub output_width: u32,
    pub output_height: u32,
    pub crop: bool,
    /// Zoom on the -100..=100 scale
    pub zoom: f64,
    /// Output frame rate, handed to zoompan so it emits at the clip rate
    pub framerate: f64,
}

impl ComposeParams {
    pub fn from_job(job: &JobDescriptor) -> Self {
        Self {
            input_width: job.input_width,
            input_height: job.input_height,
            output_width: job.output_width,
            output_height: job.output_height,
            crop: job.crop,
            zoom: job.zoom,
            framerate: job.framerate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomDirection {
    /// Magnify frame over frame up to [`ZOOM_CEILING`]
    In,
    /// Start at [`ZOOM_CEILING`] and shrink down to [`ZOOM_FLOOR`]
    Out,
}

/// Zoom stage parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomStage {
    pub direction: ZoomDirection,
    /// Magnification change per output frame
    pub rate: f64,
    /// Ceiling when zooming in, floor when zooming out
    pub limit: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl ZoomStage {
    /// Build the zoom stage for a -100..=100 zoom value, or `None` for 0.
    pub fn from_zoom(zoom: f64, width: u32, height: u32, fps: f64) -> Option<Self> {
        if zoom == 0.0 || !zoom.is_finite() {
            return None;
        }

        let zoom = zoom.clamp(-ZOOM_SCALE, ZOOM_SCALE);
        let rate = (zoom.abs() / ZOOM_SCALE) * MAX_ZOOM_RATE;
        let (direction, limit) = if zoom > 0.0 {
            (ZoomDirection::In, ZOOM_CEILING)
        } else {
            (ZoomDirection::Out, ZOOM_FLOOR)
        };

        Some(Self {
            direction,
            rate,
            limit,
            width,
            height,
            fps,
        })
    }

    fn zoom_expr(&self) -> String {
        let rate = fmt_decimal(self.rate);
        let limit = fmt_decimal(self.limit);
        match self.direction {
            ZoomDirection::In => format!("min(zoom+{},{})", rate, limit),
            ZoomDirection::Out => format!(
                "if(eq(on,0),{},max(zoom-{},{}))",
                fmt_decimal(ZOOM_CEILING),
                rate,
                limit
            ),
        }
    }
}

/// One filter in the chain.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterStage {
    Format { pix_fmt: &'static str },
    Crop { width: u32, height: u32, x: u32, y: u32 },
    Scale { width: u32, height: u32 },
    Pad { width: u32, height: u32, x: u32, y: u32 },
    Zoom(ZoomStage),
}

impl fmt::Display for FilterStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterStage::Format { pix_fmt } => write!(f, "format={}", pix_fmt),
            FilterStage::Crop { width, height, x, y } => {
                write!(f, "crop={}:{}:{}:{}", width, height, x, y)
            }
            FilterStage::Scale { width, height } => write!(f, "scale={}:{}", width, height),
            FilterStage::Pad { width, height, x, y } => {
                write!(f, "pad={}:{}:{}:{}:color=black", width, height, x, y)
            }
            FilterStage::Zoom(zoom) => write!(
                f,
                "zoompan=z='{}':d=1:x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)':s={}x{}:fps={}",
                zoom.zoom_expr(),
                zoom.width,
                zoom.height,
                fmt_decimal(zoom.fps)
            ),
        }
    }
}

/// Ordered filter chain, rendered to `-vf` syntax by `Display`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterChain {
    stages: Vec<FilterStage>,
}

impl FilterChain {
    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    pub fn crop(&self) -> Option<(u32, u32, u32, u32)> {
        self.stages.iter().find_map(|s| match s {
            FilterStage::Crop { width, height, x, y } => Some((*width, *height, *x, *y)),
            _ => None,
        })
    }

    pub fn pad(&self) -> Option<(u32, u32, u32, u32)> {
        self.stages.iter().find_map(|s| match s {
            FilterStage::Pad { width, height, x, y } => Some((*width, *height, *x, *y)),
            _ => None,
        })
    }

    pub fn zoom(&self) -> Option<&ZoomStage> {
        self.stages.iter().find_map(|s| match s {
            FilterStage::Zoom(z) => Some(z),
            _ => None,
        })
    }

    /// Size of the frame leaving the last stage.
    pub fn output_size(&self) -> Option<(u32, u32)> {
        self.stages.iter().rev().find_map(|s| match s {
            FilterStage::Scale { width, height } => Some((*width, *height)),
            _ => None,
        })
    }
}

impl fmt::Display for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}

/// Compose the encoder filter chain.
pub fn compose(params: &ComposeParams) -> FilterChain {
    let iw = params.input_width.max(1);
    let ih = params.input_height.max(1);
    let ow = params.output_width.max(1);
    let oh = params.output_height.max(1);

    let mut stages = vec![FilterStage::Format { pix_fmt: PIXEL_FORMAT }];

    if (iw, ih) != (ow, oh) {
        if params.crop {
            let (cw, ch) = (iw.min(ow), ih.min(oh));
            stages.push(FilterStage::Crop {
                width: cw,
                height: ch,
                x: (iw - cw) / 2,
                y: (ih - ch) / 2,
            });
            if (cw, ch) != (ow, oh) {
                stages.push(FilterStage::Scale { width: ow, height: oh });
            }
        } else {
            let (sw, sh) = fit_within(iw, ih, ow, oh);
            stages.push(FilterStage::Scale { width: sw, height: sh });
            stages.push(FilterStage::Pad {
                width: ow,
                height: oh,
                x: (ow - sw) / 2,
                y: (oh - sh) / 2,
            });
        }
    }

    if let Some(zoom) = ZoomStage::from_zoom(params.zoom, ow, oh, params.framerate) {
        stages.push(FilterStage::Zoom(zoom));
    }

    stages.push(FilterStage::Scale { width: ow, height: oh });

    FilterChain { stages }
}

/// Compose the chain for a queued job.
pub fn compose_for_job(job: &JobDescriptor) -> FilterChain {
    compose(&ComposeParams::from_job(job))
}

/// Largest size with the input aspect ratio that fits the output box.
fn fit_within(iw: u32, ih: u32, ow: u32, oh: u32) -> (u32, u32) {
    let (iw64, ih64, ow64, oh64) = (iw as u64, ih as u64, ow as u64, oh as u64);

    if iw64 * oh64 >= ih64 * ow64 {
        let h = (ih64 * ow64 / iw64).clamp(1, oh64);
        (ow, h as u32)
    } else {
        let w = (iw64 * oh64 / ih64).clamp(1, ow64);
        (w as u32, oh)
    }
}

/// Format a float without trailing zeros (`0.05`, `2`, `29.97`).
fn fmt_decimal(value: f64) -> String {
    let s = format!("{:.6}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" {
        "0".to_string()
    } else {
        s.to_string()
    }
}
