use super::*;
use crate::text::DeterministicTextMeasurer;
use cardsmith_core::Margins;

/// Every column is 10 units wide at font size 10.
fn measurer() -> DeterministicTextMeasurer {
    DeterministicTextMeasurer {
        char_width_factor: 1.0,
        line_height_factor: 1.0,
    }
}

/// Formulas are 10 units wide per body character and 20 units tall; `bad` fails to typeset.
struct FakeFormulas;

impl FormulaRenderer for FakeFormulas {
    fn render(&self, markup: &str, _scale: f64) -> Result<VectorFragment, ConversionError> {
        let body = markup
            .trim_start_matches("$$")
            .trim_end_matches("$$")
            .trim_matches('$');
        if body.contains("bad") {
            return Err(ConversionError::ToolFailed {
                tool: "latex".into(),
                status: Some(1),
                diagnostics: "! Undefined control sequence.".into(),
            });
        }
        let w = body.chars().count() as f64 * 10.0;
        VectorFragment::from_svg(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} 20"/>"#
        ))
    }
}

fn config() -> LayoutConfig {
    LayoutConfig {
        font_size: 10.0,
        line_height: 1.5,
        margins: Margins::uniform(10.0),
        inline_gap: 5.0,
        baseline_ratio: 0.8,
        ..Default::default()
    }
}

fn run(markup: &str, slot: &Slot, cfg: &LayoutConfig) -> LayoutOutcome {
    layout_markup(markup, slot, cfg, &measurer(), &FakeFormulas)
}

fn tall_slot(width: f64) -> Slot {
    Slot::new("text1_slot", 0.0, 0.0, width, 1000.0)
}

#[test]
fn scenario_a_fits_on_one_line() {
    let out = run("Hello $x^2$ world", &tall_slot(300.0), &config());
    assert!(out.dropped.is_empty());
    let f = &out.fragments;
    assert_eq!(f.len(), 3);
    assert!(f.iter().all(|f| f.line == 0));
    assert_eq!(f[0].x, 10.0);
    assert_eq!(f[1].x, 70.0);
    assert_eq!(f[2].x, 105.0);
    assert_eq!(f[0].y, 20.0);
    // Inline formulas sit `font_size * baseline_ratio` above the baseline.
    assert_eq!(f[1].top(), 12.0);
}

#[test]
fn scenario_a_wraps_before_the_overflowing_token() {
    let out = run("Hello $x^2$ world", &tall_slot(120.0), &config());
    let f = &out.fragments;
    assert_eq!(f.len(), 3);
    assert_eq!((f[0].line, f[1].line, f[2].line), (0, 0, 1));
    assert_eq!(f[2].x, 10.0);
    assert_eq!(f[2].y, 35.0);
}

#[test]
fn scenario_b_block_formula_gets_its_own_centered_line() {
    let out = run("before $$\\sum$$ after", &tall_slot(300.0), &config());
    let f = &out.fragments;
    assert_eq!(f.len(), 3);

    let block = &f[1];
    assert!(block.is_block());
    assert_eq!(block.line, 1);
    assert_eq!(block.y, 35.0);
    assert_eq!(block.top(), 25.0);
    // Body `\sum` is four characters wide: (280 - 40) / 2 + 10.
    assert_eq!(block.x, 130.0);

    let after = &f[2];
    assert_eq!(after.line, 2);
    assert_eq!(after.x, 10.0);
    assert_eq!(after.y, 25.0 + 20.0 + 15.0);
    assert!(after.top() >= block.bottom());
}

#[test]
fn newline_right_after_a_block_is_absorbed() {
    let a = run("$$ab$$\nnext", &tall_slot(300.0), &config());
    let b = run("$$ab$$ next", &tall_slot(300.0), &config());
    assert_eq!(a.fragments[1].y, b.fragments[1].y);
    assert_eq!(a.fragments[1].line, 1);
}

#[test]
fn scenario_c_failed_formula_is_dropped_without_gap() {
    let out = run("a $bad$ b", &tall_slot(300.0), &config());
    assert_eq!(out.fragments.len(), 2);
    assert_eq!(out.fragments[1].x, 30.0);
    assert_eq!(out.dropped.len(), 1);
    assert_eq!(out.dropped[0].token, 1);
    assert_eq!(out.dropped[0].markup, "$bad$");
    assert!(matches!(
        out.dropped[0].reason,
        DropReason::Conversion(ConversionError::ToolFailed { .. })
    ));
    assert_eq!(out.conversion_failures().count(), 1);
}

#[test]
fn scenario_d_oversized_word_is_placed_at_line_start() {
    let long = "w".repeat(50);
    let out = run(&format!("{long} tail"), &tall_slot(100.0), &config());
    let f = &out.fragments;
    assert_eq!(f.len(), 2);
    assert_eq!((f[0].x, f[0].line), (10.0, 0));
    assert_eq!(f[0].width, 500.0);
    assert_eq!((f[1].x, f[1].line), (10.0, 1));
}

#[test]
fn every_token_is_placed_or_dropped_once() {
    let markup = "one $x$ two\n\n$$y$$ three $bad$ four \\(z\\) five";
    let out = run(markup, &tall_slot(90.0), &config());
    let total = tokenize(markup)
        .filter(|t| t.kind != TokenKind::Newline)
        .count();
    let mut seen: Vec<usize> = out
        .fragments
        .iter()
        .map(|f| f.token)
        .chain(out.dropped.iter().map(|d| d.token))
        .collect();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), total);
}

#[test]
fn no_token_starts_past_the_right_margin() {
    let texts = [
        "the quick brown fox jumps over the lazy dog",
        "a $xy$ b $$zz$$ c $wxyz$ ddddddddddddddd e",
        "  lead\nnext line with    spaces",
        "$abcdefghijklmnop$ tail",
    ];
    for width in [40.0, 60.0, 95.0, 150.0, 300.0] {
        let slot = tall_slot(width);
        let left = slot.x + 10.0;
        let right = slot.x + slot.width - 10.0;
        for text in texts {
            let out = run(text, &slot, &config());
            for f in &out.fragments {
                assert!(
                    f.x <= right + 1e-9 || (f.x - left).abs() < 1e-9,
                    "{text:?} at width {width}: fragment starts at {}",
                    f.x
                );
            }
        }
    }
}

#[test]
fn baselines_never_move_up() {
    let markup = "a b c $$x$$ d\n$$yy$$\n\ne $f$ g h i j k";
    for width in [50.0, 120.0, 400.0] {
        let out = run(markup, &tall_slot(width), &config());
        let ys: Vec<f64> = out.fragments.iter().map(|f| f.y).collect();
        assert!(ys.windows(2).all(|w| w[0] <= w[1]), "{ys:?}");
    }
}

#[test]
fn block_formulas_never_share_a_line() {
    let markup = "x $a$ $$b$$ $c$ y $$d$$$$e$$ z";
    let out = run(markup, &tall_slot(300.0), &config());
    for block in out.fragments.iter().filter(|f| f.is_block()) {
        let sharing = out
            .fragments
            .iter()
            .filter(|f| f.line == block.line)
            .count();
        assert_eq!(sharing, 1, "block on line {} shares it", block.line);
    }
}

#[test]
fn layout_is_idempotent() {
    let markup = "Hello $x^2$ world\n$$\\int$$ done";
    let slot = tall_slot(150.0);
    assert_eq!(run(markup, &slot, &config()), run(markup, &slot, &config()));
}

#[test]
fn center_and_right_alignment_shift_lines() {
    let slot = tall_slot(120.0);
    let centered = run("ab", &slot, &config().with_align(Align::Center));
    assert_eq!(centered.fragments[0].x, 10.0 + (100.0 - 20.0) / 2.0);

    let right = run("ab cd", &slot, &config().with_align(Align::Right));
    // Trailing whitespace does not count towards the line's extent.
    let last = right.fragments.last().unwrap();
    assert_eq!(last.x + last.width, 110.0);
}

#[test]
fn vertical_overflow_warns_by_default() {
    let slot = Slot::new("s", 0.0, 0.0, 60.0, 40.0);
    let out = run("one two three four", &slot, &config());
    assert!(out.overflow);
    assert_eq!(out.fragments.len(), 4);
    assert!(out.dropped.is_empty());
}

#[test]
fn vertical_overflow_can_clip() {
    let slot = Slot::new("s", 0.0, 0.0, 60.0, 40.0);
    let cfg = LayoutConfig {
        overflow: OverflowPolicy::Clip,
        ..config()
    };
    let out = run("one two three four", &slot, &cfg);
    assert!(out.overflow);
    assert!(out.fragments.iter().all(|f| f.bottom() <= 30.0));
    assert!(!out.fragments.is_empty());
    assert!(out.dropped.iter().all(|d| d.reason == DropReason::Clipped));
    assert_eq!(out.fragments.len() + out.dropped.len(), 4);
}

#[test]
fn empty_markup_yields_nothing() {
    let out = run("", &tall_slot(100.0), &config());
    assert!(out.fragments.is_empty());
    assert!(!out.overflow);
}
