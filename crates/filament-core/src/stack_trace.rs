//! Captured stack traces
//!
//! Stack traces attach to slow or erroring entries. Capture strips the
//! tracing machinery's own frames so the top frame belongs to the host
//! application, not the facade.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// A single frame in a captured stack trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Function path as resolved from debug symbols.
    pub function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Captured stack trace, outermost caller last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedStackTrace {
    pub frames: Vec<StackFrame>,
}

impl CapturedStackTrace {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Capture the current thread's stack, stripped of tracing-internal
    /// frames.
    ///
    /// Frames are discarded from the top until the first frame whose function
    /// does not start with one of `internal_prefixes` (or with this module's
    /// own capture machinery). That frame is the instrumentation advice; the
    /// frames after it belong to the host application, so the advice frame is
    /// dropped as well. Returns an empty trace and logs at warn when no such
    /// frame exists.
    pub fn capture_stripped(internal_prefixes: &[&str]) -> CapturedStackTrace {
        let raw = backtrace::Backtrace::new();
        let mut frames: Vec<StackFrame> = Vec::new();
        for frame in raw.frames() {
            for symbol in frame.symbols() {
                let function = match symbol.name() {
                    Some(name) => name.to_string(),
                    None => continue,
                };
                frames.push(StackFrame {
                    function,
                    file: symbol
                        .filename()
                        .map(|path| path.to_string_lossy().into_owned()),
                    line: symbol.lineno(),
                });
            }
        }
        let advice_position = frames
            .iter()
            .position(|frame| !is_internal(&frame.function, internal_prefixes));
        match advice_position {
            // the found frame is the advice that invoked the facade; the
            // host application's frames start right after it
            Some(position) => CapturedStackTrace {
                frames: frames.split_off(position + 1),
            },
            None => {
                warn!("stack trace did not extend beyond the tracing facade");
                CapturedStackTrace { frames: Vec::new() }
            }
        }
    }
}

fn is_internal(function: &str, internal_prefixes: &[&str]) -> bool {
    const ALWAYS_INTERNAL: &[&str] = &[
        "backtrace::",
        "filament_core::stack_trace",
        "<filament_core::stack_trace",
    ];
    ALWAYS_INTERNAL
        .iter()
        .chain(internal_prefixes.iter())
        .any(|prefix| function.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_excludes_internal_frames() {
        let trace = CapturedStackTrace::capture_stripped(&[]);
        for frame in &trace.frames {
            assert!(
                !frame.function.starts_with("filament_core::stack_trace"),
                "internal frame leaked: {}",
                frame.function
            );
            assert!(
                !frame.function.starts_with("backtrace::"),
                "backtrace frame leaked: {}",
                frame.function
            );
        }
    }

    #[test]
    fn test_capture_with_unmatchable_prefix_covering_everything() {
        // every frame matches, so the capture finds no caller and comes
        // back empty rather than exposing internals
        let trace = CapturedStackTrace::capture_stripped(&[""]);
        assert!(trace.is_empty());
    }

    #[test]
    fn test_serde_roundtrip() {
        let trace = CapturedStackTrace {
            frames: vec![StackFrame {
                function: "app::handler".to_string(),
                file: Some("src/handler.rs".to_string()),
                line: Some(42),
            }],
        };
        let json = serde_json::to_string(&trace).unwrap();
        let back: CapturedStackTrace = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trace);
    }
}
