use console::Style;
use darkcal_core::config::SessionConfig;
use darkcal_core::grid::GridSummary;
use darkcal_core::session::Session;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    disabled: Style,
    alert: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            disabled: Style::new().dim().yellow(),
            alert: Style::new().red().bold(),
        }
    }
}

/// Live-testing outcome collected by the simulator.
pub struct RunReport {
    pub hot_pixels: usize,
    pub live_frames: u64,
    pub frames_with_hits: u64,
    pub threshold_raises: u64,
}

pub fn print_session_summary(config: &SessionConfig) {
    let s = Styles::new();

    println!();
    println!("  {}", s.title.apply_to("Dark Calibration"));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(16)));
    println!();

    println!(
        "  {:<14}{}",
        s.label.apply_to("Grid"),
        s.value.apply_to(format!("{} x {}", config.width, config.height))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Depth"),
        s.value.apply_to(config.bit_depth)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Estimator"),
        s.method.apply_to(config.estimator)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Samples"),
        s.method.apply_to(config.sample_scale)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Max exposure"),
        s.value.apply_to(format!("{} s", config.max_exposure_seconds))
    );
    println!();

    println!("  {}", s.header.apply_to("Significance"));
    let sig = &config.significance;
    if !sig.enabled {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Testing"),
            s.disabled.apply_to("disabled")
        );
    } else {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Threshold"),
            s.value.apply_to(sig.threshold)
        );
        match sig.auto_raise {
            Some(ref raise) => println!(
                "    {:<12}{}",
                s.label.apply_to("Auto-raise"),
                s.value
                    .apply_to(format!("+{} after {} frames", raise.step, raise.max_frames_above))
            ),
            None => println!(
                "    {:<12}{}",
                s.label.apply_to("Auto-raise"),
                s.disabled.apply_to("disabled")
            ),
        }
    }
    println!();
}

fn print_grid_row(s: &Styles, label: &str, summary: &GridSummary) {
    println!(
        "    {:<12}{}",
        s.label.apply_to(label),
        s.value.apply_to(format!(
            "min {:.3}  mean {:.3}  max {:.3}",
            summary.min, summary.mean, summary.max
        ))
    );
}

pub fn print_run_summary(session: &Session, report: &RunReport) {
    let s = Styles::new();
    let totals = session.totals();

    println!();
    println!("  {}", s.header.apply_to("Calibration"));
    println!(
        "    {:<12}{}",
        s.label.apply_to("Frames"),
        s.value.apply_to(totals.frame_count)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Exposure"),
        s.value.apply_to(format!(
            "{:.2} s total, {:.3} s mean",
            totals.exposure_sum,
            totals.mean_exposure()
        ))
    );
    if let Some(baseline) = session.baseline() {
        let summary = baseline.summary();
        print_grid_row(&s, "Mean rate", &summary.mean_rate);
        print_grid_row(&s, "Std dev", &summary.std_dev_rate);
        print_grid_row(&s, "Std err", &summary.std_err_rate);
    }
    let anomalies = session.anomaly_count();
    let anomaly_style = if anomalies > 0 { &s.alert } else { &s.value };
    println!(
        "    {:<12}{}",
        s.label.apply_to("Clamped"),
        anomaly_style.apply_to(anomalies)
    );
    println!();

    println!("  {}", s.header.apply_to("Live Testing"));
    if !session.significance_enabled() {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Testing"),
            s.disabled.apply_to("disabled")
        );
        println!();
        return;
    }
    println!(
        "    {:<12}{}",
        s.label.apply_to("Frames"),
        s.value.apply_to(report.live_frames)
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Injected"),
        s.value.apply_to(format!("{} hot pixels per frame", report.hot_pixels))
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Hits"),
        s.alert.apply_to(session.above_threshold_count())
    );
    println!(
        "    {:<12}{}",
        s.label.apply_to("Hit frames"),
        s.value
            .apply_to(format!("{} / {}", report.frames_with_hits, report.live_frames))
    );
    if let Some(threshold) = session.significance_threshold() {
        println!(
            "    {:<12}{}",
            s.label.apply_to("Threshold"),
            s.value.apply_to(format!(
                "{threshold:.3} sigma ({} raises)",
                report.threshold_raises
            ))
        );
    }
    println!();
}
