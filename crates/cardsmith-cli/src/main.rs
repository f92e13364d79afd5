use cardsmith::batch::{BatchOptions, BatchSummary, CardReport, OutputFormat, run_batch};
use cardsmith::raster::{RasterOptions, RasterSize};
use cardsmith::{
    CachedFormulaRenderer, CardError, CardRenderer, FontFileTextMeasurer, LatexFormulaRenderer,
    LayoutConfig, OverflowPolicy, SlotStatus, Template, Token, Toolchain, load_deck, tokenize,
};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

#[derive(Debug)]
enum CliError {
    Usage(String),
    Io(std::io::Error),
    Cardsmith(cardsmith::Error),
    Json(serde_json::Error),
    Font(String),
    /// The batch ran but at least one card produced no SVG.
    CardsFailed(usize),
    ToolchainUnusable,
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Usage(msg) => write!(f, "{msg}"),
            CliError::Io(err) => write!(f, "I/O error: {err}"),
            CliError::Cardsmith(err) => write!(f, "{err}"),
            CliError::Json(err) => write!(f, "JSON error: {err}"),
            CliError::Font(msg) => write!(f, "{msg}"),
            CliError::CardsFailed(n) => write!(f, "{n} card(s) produced no SVG"),
            CliError::ToolchainUnusable => {
                write!(f, "LaTeX toolchain unusable (need latex or pdflatex, plus dvisvgm)")
            }
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<cardsmith::Error> for CliError {
    fn from(value: cardsmith::Error) -> Self {
        Self::Cardsmith(value)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
enum Command {
    #[default]
    Build,
    Tokens,
    CheckToolchain,
}

#[derive(Debug, Default)]
struct Args {
    command: Option<Command>,
    template: Option<PathBuf>,
    deck: Option<PathBuf>,
    cards: Option<PathBuf>,
    out: Option<PathBuf>,
    format: OutputFormat,
    size: Option<RasterSize>,
    font: Option<PathBuf>,
    jobs: Option<usize>,
    timeout: Option<Duration>,
    clip: bool,
    fail_fast: bool,
    background: Option<String>,
    pretty: bool,
    input: Option<String>,
}

fn usage() -> String {
    "cardsmith-cli\n\
\n\
USAGE:\n\
  cardsmith-cli build --template <svg> (--deck <file> | --cards <dir>) [--out <dir>] [--format svg|png|jpg|pdf] [--scale <n> | --width <px> | --dpi <n>] [--font <ttf>] [--jobs <n>] [--timeout <secs>] [--clip] [--fail-fast] [--background <css-color>]\n\
  cardsmith-cli tokens [--pretty] [<path>|-]\n\
  cardsmith-cli check-toolchain\n\
\n\
NOTES:\n\
  - build writes <out>/<id>.svg for every card (default out dir: ./out); other formats are converted from it.\n\
  - --deck takes a .yml/.yaml/.json/.csv/.tsv file; --cards takes a directory with one sub-directory per card.\n\
  - tokens reads markup from <path> (or stdin when omitted or '-') and prints the token stream as JSON.\n\
  - Exit status: 0 when every card produced an SVG, 1 otherwise, 2 on usage errors.\n\
  - Set CARDSMITH_LOG (e.g. debug) to see diagnostics; the default level is warn.\n\
"
    .to_string()
}

fn usage_error(msg: impl std::fmt::Display) -> CliError {
    CliError::Usage(format!("error: {msg}\n\n{}", usage()))
}

fn next_value<'a>(
    it: &mut impl Iterator<Item = &'a String>,
    flag: &str,
) -> Result<&'a String, CliError> {
    it.next()
        .ok_or_else(|| usage_error(format!("{flag} needs a value")))
}

fn parse_positive<T>(raw: &str, flag: &str) -> Result<T, CliError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match raw.parse::<T>() {
        Ok(v) if v > T::default() => Ok(v),
        _ => Err(usage_error(format!("{flag} expects a positive number, got `{raw}`"))),
    }
}

fn set_size(args: &mut Args, size: RasterSize) -> Result<(), CliError> {
    if args.size.is_some() {
        return Err(usage_error("--scale, --width and --dpi are mutually exclusive"));
    }
    args.size = Some(size);
    Ok(())
}

fn parse_args(argv: &[String]) -> Result<Args, CliError> {
    let mut args = Args::default();

    let mut it = argv.iter().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--help" | "-h" => return Err(CliError::Usage(usage())),
            "build" if args.command.is_none() => args.command = Some(Command::Build),
            "tokens" if args.command.is_none() => args.command = Some(Command::Tokens),
            "check-toolchain" if args.command.is_none() => {
                args.command = Some(Command::CheckToolchain)
            }
            "--template" => args.template = Some(next_value(&mut it, a)?.into()),
            "--deck" => args.deck = Some(next_value(&mut it, a)?.into()),
            "--cards" => args.cards = Some(next_value(&mut it, a)?.into()),
            "--out" => args.out = Some(next_value(&mut it, a)?.into()),
            "--font" => args.font = Some(next_value(&mut it, a)?.into()),
            "--format" => {
                args.format = next_value(&mut it, a)?
                    .parse::<OutputFormat>()
                    .map_err(usage_error)?;
            }
            "--scale" => {
                let v = parse_positive::<f32>(next_value(&mut it, a)?, a)?;
                set_size(&mut args, RasterSize::Scale(v))?;
            }
            "--width" => {
                let v = parse_positive::<u32>(next_value(&mut it, a)?, a)?;
                set_size(&mut args, RasterSize::Width(v))?;
            }
            "--dpi" => {
                let v = parse_positive::<f32>(next_value(&mut it, a)?, a)?;
                set_size(&mut args, RasterSize::Dpi(v))?;
            }
            "--jobs" => args.jobs = Some(parse_positive::<usize>(next_value(&mut it, a)?, a)?),
            "--timeout" => {
                let secs = parse_positive::<f64>(next_value(&mut it, a)?, a)?;
                let timeout = Duration::try_from_secs_f64(secs)
                    .map_err(|_| usage_error(format!("{a} is out of range: `{secs}`")))?;
                args.timeout = Some(timeout);
            }
            "--clip" => args.clip = true,
            "--fail-fast" => args.fail_fast = true,
            "--pretty" => args.pretty = true,
            "--background" => {
                let bg = next_value(&mut it, a)?.trim();
                if !bg.is_empty() {
                    args.background = Some(bg.to_string());
                }
            }
            other if other.starts_with('-') && other != "-" => {
                return Err(usage_error(format!("unknown option `{other}`")));
            }
            path => {
                if args.command != Some(Command::Tokens) || args.input.is_some() {
                    return Err(usage_error(format!("unexpected argument `{path}`")));
                }
                args.input = Some(path.to_string());
            }
        }
    }

    if args.command.unwrap_or_default() == Command::Build {
        if args.template.is_none() {
            return Err(usage_error("build needs --template <svg>"));
        }
        if args.deck.is_some() == args.cards.is_some() {
            return Err(usage_error("build needs exactly one of --deck <file> or --cards <dir>"));
        }
    }

    Ok(args)
}

fn read_input(input: Option<&str>) -> Result<String, CliError> {
    match input {
        None | Some("-") => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
        Some(path) => Ok(std::fs::read_to_string(path)?),
    }
}

fn write_json(value: &impl Serialize, pretty: bool) -> Result<(), CliError> {
    if pretty {
        serde_json::to_writer_pretty(std::io::stdout().lock(), value)?;
    } else {
        serde_json::to_writer(std::io::stdout().lock(), value)?;
    }
    println!();
    Ok(())
}

fn run_tokens(args: &Args) -> Result<(), CliError> {
    let text = read_input(args.input.as_deref())?;
    let tokens: Vec<Token<'_>> = tokenize(&text).collect();
    write_json(&tokens, args.pretty)
}

fn run_check_toolchain() -> Result<(), CliError> {
    let toolchain = Toolchain::detect();
    for (name, path) in [
        ("latex", &toolchain.latex),
        ("pdflatex", &toolchain.pdflatex),
        ("dvisvgm", &toolchain.dvisvgm),
    ] {
        match path {
            Some(p) => println!("{name}: {}", p.display()),
            None => println!("{name}: not found"),
        }
    }
    if toolchain.is_usable() {
        println!("toolchain: ok");
        Ok(())
    } else {
        Err(CliError::ToolchainUnusable)
    }
}

fn run_build(args: &Args) -> Result<(), CliError> {
    let (Some(template_path), Some(deck_path)) =
        (args.template.as_ref(), args.deck.as_ref().or(args.cards.as_ref()))
    else {
        return Err(usage_error("build needs --template and --deck or --cards"));
    };

    let template = Template::from_file(template_path).map_err(cardsmith::Error::from)?;
    let entries = load_deck(deck_path)?;

    let mut latex = LatexFormulaRenderer::detect();
    if let Some(timeout) = args.timeout {
        latex = latex.with_timeout(timeout);
    }
    if !latex.toolchain().is_usable() {
        tracing::warn!("LaTeX toolchain not found; formulas will be reported as dropped");
    }

    let mut layout = LayoutConfig::default();
    if args.clip {
        layout.overflow = OverflowPolicy::Clip;
    }

    let mut renderer =
        CardRenderer::new(template, Arc::new(CachedFormulaRenderer::new(latex))).with_layout(layout);
    if let Some(font) = args.font.as_ref() {
        let measurer = FontFileTextMeasurer::from_file(font).map_err(|e| CliError::Font(e.to_string()))?;
        renderer = renderer.with_measurer(Arc::new(measurer));
    }

    let options = BatchOptions {
        format: args.format,
        jobs: args.jobs,
        fail_fast: args.fail_fast,
        raster: RasterOptions {
            size: args.size.unwrap_or(RasterSize::Scale(1.0)),
            background: args.background.clone(),
            ..Default::default()
        },
        ..BatchOptions::new(args.out.clone().unwrap_or_else(|| PathBuf::from("out")))
    };

    let reports = run_batch(&renderer, entries, &options, &AtomicBool::new(false))?;
    for report in &reports {
        print_report(report);
    }
    let summary = BatchSummary::from_reports(&reports);
    print_summary(&summary);

    if summary.is_success() {
        Ok(())
    } else {
        Err(CliError::CardsFailed(summary.cards - summary.rendered))
    }
}

fn print_report(report: &CardReport) {
    match &report.result {
        Ok(written) => {
            println!("card {}: ok ({})", report.id, written.svg.display());
            match &written.converted {
                Some(Ok(path)) => println!("  convert: ok ({})", path.display()),
                Some(Err(e)) => println!("  convert: fail: {e}"),
                None => {}
            }
        }
        Err(CardError::Aborted) => println!("card {}: skip: aborted", report.id),
        Err(e) => println!("card {}: fail: {e}", report.id),
    }
    for slot in &report.slots {
        let mut line = format!("  {}: {}", slot.slot, slot.status);
        if slot.status == SlotStatus::Ok && slot.dropped > 0 {
            line.push_str(&format!(" ({} dropped)", slot.dropped));
        }
        if slot.overflow {
            line.push_str(" [overflow]");
        }
        if let Some(msg) = slot.message.as_deref() {
            line.push_str(": ");
            line.push_str(msg);
        }
        println!("{line}");
    }
}

fn print_summary(s: &BatchSummary) {
    println!(
        "summary: {} card(s), {} rendered, {} failed, {} aborted, {} conversion failure(s); slots: {} ok, {} skip, {} fail",
        s.cards,
        s.rendered,
        s.failed,
        s.aborted,
        s.conversion_failed,
        s.slots_ok,
        s.slots_skipped,
        s.slots_failed
    );
}

fn run(args: Args) -> Result<(), CliError> {
    match args.command.unwrap_or_default() {
        Command::Build => run_build(&args),
        Command::Tokens => run_tokens(&args),
        Command::CheckToolchain => run_check_toolchain(),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("CARDSMITH_LOG", "warn"))
        .init();

    let args = match parse_args(&std::env::args().collect::<Vec<_>>()) {
        Ok(v) => v,
        Err(CliError::Usage(msg)) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(args) {
        match err {
            CliError::Usage(msg) => {
                eprintln!("{msg}");
                std::process::exit(2);
            }
            err => {
                eprintln!("{err}");
                std::process::exit(1);
            }
        }
    }
}
