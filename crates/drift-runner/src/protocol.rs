//! Line-oriented command protocol understood by the engine in `-s stdin` mode.

use crate::error::{DriftError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    Gpu,
    Cpu,
}

impl RenderMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderMode::Gpu => "gpu",
            RenderMode::Cpu => "cpu",
        }
    }
}

/// View rectangle in document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Default for ViewRect {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            w: 1.0,
            h: 1.0,
        }
    }
}

/// Operation that may be repeated by `loop <n> ...`.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopAction {
    Wait,
    Zoom { x: f64, y: f64, factor: f64 },
    PxZoom { x: i64, y: i64, amount: i64 },
    Translate { dx: f64, dy: f64 },
    PxTranslate { dx: i64, dy: i64 },
    /// Render frames and print their performance counters.
    PrintSpf,
}

impl fmt::Display for LoopAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopAction::Wait => write!(f, "wait"),
            LoopAction::Zoom { x, y, factor } => write!(f, "zoom {} {} {}", x, y, factor),
            LoopAction::PxZoom { x, y, amount } => write!(f, "pxzoom {} {} {}", x, y, amount),
            LoopAction::Translate { dx, dy } => write!(f, "translate {} {}", dx, dy),
            LoopAction::PxTranslate { dx, dy } => write!(f, "pxtranslate {} {}", dx, dy),
            LoopAction::PrintSpf => write!(f, "printspf"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Mode(RenderMode),
    SetBounds(ViewRect),
    LoadSvg(PathBuf),
    Clear,
    Loop { count: u64, action: LoopAction },
    /// Writes a telemetry file. The engine does not reply.
    QueryGpuBounds(PathBuf),
    /// Replies with one tab-delimited line `x y w h`.
    PrintBounds,
    Screenshot(PathBuf),
    Lazy(bool),
    ClearPerf,
    RecordPerf,
    PrintPerf,
    Quit,
}

impl EngineCommand {
    pub fn repeat(count: u64, action: LoopAction) -> Self {
        EngineCommand::Loop { count, action }
    }

    /// Number of reply lines the engine writes for this command. A looped
    /// `printspf` reports once, averaged over the looped frames.
    pub fn reply_lines(&self) -> usize {
        match self {
            EngineCommand::PrintBounds | EngineCommand::PrintPerf => 1,
            EngineCommand::Loop {
                action: LoopAction::PrintSpf,
                ..
            } => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineCommand::Mode(mode) => write!(f, "{}", mode.as_str()),
            EngineCommand::SetBounds(r) => write!(f, "setbounds {} {} {} {}", r.x, r.y, r.w, r.h),
            EngineCommand::LoadSvg(path) => write!(f, "loadsvg {}", path.display()),
            EngineCommand::Clear => write!(f, "clear"),
            EngineCommand::Loop { count, action } => write!(f, "loop {} {}", count, action),
            EngineCommand::QueryGpuBounds(path) => write!(f, "querygpubounds {}", path.display()),
            EngineCommand::PrintBounds => write!(f, "printbounds"),
            EngineCommand::Screenshot(path) => write!(f, "screenshot {}", path.display()),
            EngineCommand::Lazy(true) => write!(f, "lazy"),
            EngineCommand::Lazy(false) => write!(f, "nolazy"),
            EngineCommand::ClearPerf => write!(f, "clearperf"),
            EngineCommand::RecordPerf => write!(f, "recordperf"),
            EngineCommand::PrintPerf => write!(f, "printperf"),
            EngineCommand::Quit => write!(f, "quit"),
        }
    }
}

/// Parses a tab-delimited reply row of floats. Empty fields are ignored.
pub fn parse_float_row(command: &EngineCommand, reply: &str) -> Result<Vec<f64>> {
    let malformed = || DriftError::MalformedReply {
        command: command.to_string(),
        reply: reply.to_string(),
    };
    let values = reply
        .trim_matches(|c| c == ' ' || c == '\r' || c == '\n')
        .split('\t')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(|field| field.parse::<f64>().map_err(|_| malformed()))
        .collect::<Result<Vec<f64>>>()?;
    if values.is_empty() {
        return Err(malformed());
    }
    Ok(values)
}

pub fn parse_view_rect(reply: &str) -> Result<ViewRect> {
    let values = parse_float_row(&EngineCommand::PrintBounds, reply)?;
    if values.len() < 4 {
        return Err(DriftError::MalformedReply {
            command: EngineCommand::PrintBounds.to_string(),
            reply: reply.to_string(),
        });
    }
    Ok(ViewRect {
        x: values[0],
        y: values[1],
        w: values[2],
        h: values[3],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_loop_commands() {
        let zoom = EngineCommand::repeat(
            1,
            LoopAction::Zoom {
                x: 0.5,
                y: 0.5,
                factor: 0.5,
            },
        );
        assert_eq!(zoom.to_string(), "loop 1 zoom 0.5 0.5 0.5");
        let px = EngineCommand::repeat(
            51,
            LoopAction::PxZoom {
                x: 400,
                y: 300,
                amount: -1,
            },
        );
        assert_eq!(px.to_string(), "loop 51 pxzoom 400 300 -1");
        assert_eq!(EngineCommand::repeat(3, LoopAction::PrintSpf).reply_lines(), 1);
    }

    #[test]
    fn renders_session_commands() {
        let rect = ViewRect {
            x: 0.0,
            y: 0.0,
            w: 1.0,
            h: 1.0,
        };
        assert_eq!(EngineCommand::SetBounds(rect).to_string(), "setbounds 0 0 1 1");
        assert_eq!(
            EngineCommand::QueryGpuBounds(PathBuf::from("step3.dat")).to_string(),
            "querygpubounds step3.dat"
        );
        assert_eq!(EngineCommand::Lazy(false).to_string(), "nolazy");
        assert_eq!(EngineCommand::Mode(RenderMode::Cpu).to_string(), "cpu");
        assert_eq!(EngineCommand::Quit.reply_lines(), 0);
    }

    #[test]
    fn parses_reply_rows_with_trailing_noise() {
        let row = parse_float_row(&EngineCommand::PrintPerf, "1\t0.016\t2.5\t\r\n").expect("row");
        assert_eq!(row, vec![1.0, 0.016, 2.5]);
        let rect = parse_view_rect("0.25\t0.25\t0.5\t0.5").expect("rect");
        assert_eq!(rect.w, 0.5);
    }

    #[test]
    fn rejects_non_numeric_replies() {
        assert!(parse_float_row(&EngineCommand::PrintBounds, "error: no document").is_err());
        assert!(parse_float_row(&EngineCommand::PrintBounds, "").is_err());
        assert!(parse_view_rect("1\t2").is_err());
    }
}
