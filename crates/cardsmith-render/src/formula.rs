//! Formula typesetting behind the [`FormulaRenderer`] contract.
//!
//! The LaTeX backend shells out to `latex` + `dvisvgm` (or `pdflatex` + `dvisvgm --pdf`), each
//! render inside its own temporary directory and bounded by a timeout.

use crate::svgdom::{SvgDocument, parse_view_box};
use regex::Regex;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, OnceLock, mpsc};
use std::time::{Duration, Instant};

const DIAGNOSTICS_LIMIT: usize = 800;

/// How long to keep draining output after the child is gone. Helpers spawned by the tool may
/// hold the pipes open well past that.
const PIPE_GRACE: Duration = Duration::from_millis(200);

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const TEX_TEMPLATE_HEAD: &str = "\\documentclass[preview,border=2pt]{standalone}\n\
\\usepackage[T1]{fontenc}\n\
\\usepackage{amsmath,amssymb}\n\
\\begin{document}\n";
const TEX_TEMPLATE_TAIL: &str = "\n\\end{document}\n";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    #[error("LaTeX toolchain not found on PATH (need latex or pdflatex, plus dvisvgm)")]
    ToolchainMissing,
    #[error("{tool} failed ({}): {diagnostics}", describe_status(.status))]
    ToolFailed {
        tool: String,
        status: Option<i32>,
        diagnostics: String,
    },
    #[error("{tool} timed out after {seconds}s{}", describe_output(.diagnostics))]
    Timeout {
        tool: String,
        seconds: u64,
        diagnostics: String,
    },
    #[error("formula produced an unusable SVG: {0}")]
    InvalidSvg(String),
    #[error("empty formula")]
    EmptyMarkup,
    #[error("I/O error while rendering formula: {0}")]
    Io(String),
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn describe_output(diagnostics: &str) -> String {
    if diagnostics.is_empty() {
        String::new()
    } else {
        format!(": {diagnostics}")
    }
}

impl From<std::io::Error> for ConversionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// A typeset formula: a standalone SVG document plus its measured box.
///
/// `origin_x`/`origin_y` are the viewBox minimum; content drawn at `(origin_x, origin_y)` sits at
/// the fragment's top-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorFragment {
    pub document: SvgDocument,
    pub width: f64,
    pub height: f64,
    pub origin_x: f64,
    pub origin_y: f64,
}

impl VectorFragment {
    /// Parses an SVG and reads its box from `viewBox`, falling back to `width`/`height`.
    pub fn from_svg(text: &str) -> Result<Self, ConversionError> {
        let document =
            SvgDocument::parse(text).map_err(|e| ConversionError::InvalidSvg(e.to_string()))?;

        let (origin_x, origin_y, width, height) = match document.view_box() {
            Some(vb) => vb,
            None => {
                let w = document.root.attr("width").and_then(parse_length);
                let h = document.root.attr("height").and_then(parse_length);
                match (w, h) {
                    (Some(w), Some(h)) => (0.0, 0.0, w, h),
                    _ => {
                        return Err(ConversionError::InvalidSvg(
                            "missing viewBox and width/height".to_string(),
                        ));
                    }
                }
            }
        };
        if !(width.is_finite() && height.is_finite()) || width < 0.0 || height < 0.0 {
            return Err(ConversionError::InvalidSvg(format!(
                "bad fragment size {width}x{height}"
            )));
        }

        Ok(Self {
            document,
            width,
            height,
            origin_x,
            origin_y,
        })
    }
}

pub trait FormulaRenderer {
    /// Typesets `markup` (delimiters included) at `scale`.
    fn render(&self, markup: &str, scale: f64) -> Result<VectorFragment, ConversionError>;
}

fn re_length() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)\s*([a-zA-Z%]*)\s*$")
            .expect("valid regex")
    })
}

/// Converts an SVG length to user units (px). Percentages and unknown units yield `None`.
pub fn parse_length(raw: &str) -> Option<f64> {
    let caps = re_length().captures(raw)?;
    let value: f64 = caps.get(1)?.as_str().parse().ok()?;
    let factor = match caps.get(2).map(|m| m.as_str()).unwrap_or("") {
        "" | "px" => 1.0,
        "pt" => 96.0 / 72.0,
        "pc" => 16.0,
        "in" => 96.0,
        "cm" => 96.0 / 2.54,
        "mm" => 96.0 / 25.4,
        _ => return None,
    };
    Some(value * factor)
}

/// Wraps a bare expression in `$...$`; markup that already carries math delimiters is returned
/// unchanged.
pub fn ensure_math_delimiters(markup: &str) -> String {
    let t = markup.trim();
    let delimited = (t.starts_with('$') && t.ends_with('$') && t.len() >= 2)
        || (t.starts_with("\\(") && t.ends_with("\\)"))
        || (t.starts_with("\\[") && t.ends_with("\\]"))
        || t.starts_with("\\begin{");
    if delimited {
        t.to_string()
    } else {
        format!("${t}$")
    }
}

/// Executables the LaTeX backend can use, as found on `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toolchain {
    pub latex: Option<PathBuf>,
    pub pdflatex: Option<PathBuf>,
    pub dvisvgm: Option<PathBuf>,
}

impl Toolchain {
    pub fn detect() -> Self {
        Self {
            latex: which("latex"),
            pdflatex: which("pdflatex"),
            dvisvgm: which("dvisvgm"),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.dvisvgm.is_some() && (self.latex.is_some() || self.pdflatex.is_some())
    }
}

fn which(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    let exe_names: Vec<String> = if cfg!(windows) {
        vec![format!("{program}.exe"), program.to_string()]
    } else {
        vec![program.to_string()]
    };
    std::env::split_paths(&path)
        .flat_map(|dir| exe_names.iter().map(move |n| dir.join(n)))
        .find(|candidate| candidate.is_file())
}

#[derive(Debug, Clone)]
pub struct LatexFormulaRenderer {
    toolchain: Toolchain,
    timeout: Duration,
}

impl LatexFormulaRenderer {
    pub fn new(toolchain: Toolchain) -> Self {
        Self {
            toolchain,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn detect() -> Self {
        Self::new(Toolchain::detect())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    fn render_in(
        &self,
        dir: &Path,
        markup: &str,
        scale: f64,
    ) -> Result<VectorFragment, ConversionError> {
        let Some(dvisvgm) = self.toolchain.dvisvgm.as_deref() else {
            return Err(ConversionError::ToolchainMissing);
        };
        let tex = format!("{TEX_TEMPLATE_HEAD}{markup}{TEX_TEMPLATE_TAIL}");
        std::fs::write(dir.join("snippet.tex"), tex)?;
        let scale_arg = format!("--scale={scale}");

        let mut latex_failure = None;
        if let Some(latex) = self.toolchain.latex.as_deref() {
            match self.run(dir, latex, &["-interaction=nonstopmode", "snippet.tex"]) {
                Ok(()) => {
                    self.run(
                        dir,
                        dvisvgm,
                        &["snippet.dvi", "-n", "--exact", &scale_arg, "-o", "snippet.svg"],
                    )?;
                    return read_svg(dir);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "latex failed; trying pdflatex");
                    latex_failure = Some(e);
                }
            }
        }

        let Some(pdflatex) = self.toolchain.pdflatex.as_deref() else {
            return Err(latex_failure.unwrap_or(ConversionError::ToolchainMissing));
        };
        self.run(dir, pdflatex, &["-interaction=nonstopmode", "snippet.tex"])?;
        self.run(
            dir,
            dvisvgm,
            &["--pdf", "snippet.pdf", "-n", "--exact", &scale_arg, "-o", "snippet.svg"],
        )?;
        read_svg(dir)
    }

    fn run(&self, dir: &Path, program: &Path, args: &[&str]) -> Result<(), ConversionError> {
        let tool = program
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| program.display().to_string());
        tracing::debug!(tool = %tool, ?args, "running");
        run_with_timeout(
            Command::new(program).args(args).current_dir(dir),
            &tool,
            self.timeout,
        )
    }
}

fn read_svg(dir: &Path) -> Result<VectorFragment, ConversionError> {
    let out = dir.join("snippet.svg");
    let text = std::fs::read_to_string(&out).map_err(|e| {
        ConversionError::InvalidSvg(format!("dvisvgm produced no output ({e})"))
    })?;
    VectorFragment::from_svg(&text)
}

/// Copies `pipe` into `sink` chunk by chunk and signals `done` at EOF. The thread is never
/// joined, so a pipe held open by a stray grandchild cannot block the caller.
fn spawn_reader<R: Read + Send + 'static>(
    pipe: Option<R>,
    sink: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Sender<()>,
) {
    let Some(mut pipe) = pipe else {
        let _ = done.send(());
        return;
    };
    std::thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = done.send(());
    });
}

fn truncate_diagnostics(text: &str) -> String {
    if text.chars().count() <= DIAGNOSTICS_LIMIT {
        return text.trim_end().to_string();
    }
    let mut out: String = text.chars().take(DIAGNOSTICS_LIMIT).collect();
    out.push('…');
    out
}

/// Runs a command with piped, drained output. The child is killed once `timeout` elapses, and
/// the call returns within `timeout` plus a short grace period even if the child's own
/// subprocesses keep its output pipes open.
fn run_with_timeout(cmd: &mut Command, tool: &str, timeout: Duration) -> Result<(), ConversionError> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let output = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = mpsc::channel();
    spawn_reader(child.stdout.take(), Arc::clone(&output), done_tx.clone());
    spawn_reader(child.stderr.take(), Arc::clone(&output), done_tx);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            break None;
        }
        std::thread::sleep(Duration::from_millis(10));
    };

    let drain_until = Instant::now().max(deadline) + PIPE_GRACE;
    for _ in 0..2 {
        let remaining = drain_until.saturating_duration_since(Instant::now());
        if done_rx.recv_timeout(remaining).is_err() {
            tracing::debug!(tool, "output pipes still open after exit; not waiting for them");
            break;
        }
    }
    let diagnostics = {
        let output = output.lock().unwrap_or_else(|e| e.into_inner());
        truncate_diagnostics(&String::from_utf8_lossy(&output))
    };

    match status {
        None => Err(ConversionError::Timeout {
            tool: tool.to_string(),
            seconds: timeout.as_secs(),
            diagnostics,
        }),
        Some(status) if status.success() => Ok(()),
        Some(status) => Err(ConversionError::ToolFailed {
            tool: tool.to_string(),
            status: status.code(),
            diagnostics,
        }),
    }
}

impl FormulaRenderer for LatexFormulaRenderer {
    fn render(&self, markup: &str, scale: f64) -> Result<VectorFragment, ConversionError> {
        if markup.trim().is_empty() {
            return Err(ConversionError::EmptyMarkup);
        }
        if !self.toolchain.is_usable() {
            return Err(ConversionError::ToolchainMissing);
        }
        let dir = tempfile::Builder::new().prefix("cardsmith-tex").tempdir()?;
        self.render_in(dir.path(), markup, scale)
    }
}

/// Memoizes another renderer by `(markup, scale)`. Timeouts are not cached.
pub struct CachedFormulaRenderer<R> {
    inner: R,
    cache: Mutex<HashMap<(String, u64), Result<VectorFragment, ConversionError>>>,
}

impl<R> CachedFormulaRenderer<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: FormulaRenderer> FormulaRenderer for CachedFormulaRenderer<R> {
    fn render(&self, markup: &str, scale: f64) -> Result<VectorFragment, ConversionError> {
        let key = (markup.to_string(), scale.to_bits());
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return hit.clone();
        }

        // Rendering happens outside the lock; concurrent misses on the same key may both render.
        let result = self.inner.render(markup, scale);
        if !matches!(result, Err(ConversionError::Timeout { .. })) {
            self.cache
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key, result.clone());
        }
        result
    }
}

impl<T: FormulaRenderer + ?Sized> FormulaRenderer for &T {
    fn render(&self, markup: &str, scale: f64) -> Result<VectorFragment, ConversionError> {
        (**self).render(markup, scale)
    }
}

impl<T: FormulaRenderer + ?Sized> FormulaRenderer for std::sync::Arc<T> {
    fn render(&self, markup: &str, scale: f64) -> Result<VectorFragment, ConversionError> {
        (**self).render(markup, scale)
    }
}
