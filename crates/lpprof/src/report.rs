use metrics_store::{MetricSummary, MetricType, MetricsStore};
use time::macros::format_description;
use time::OffsetDateTime;

const NAME_WIDTH: usize = 40;
const VALUE_WIDTH: usize = 22;

/// First line of a report: host and local time of the run
pub fn header() -> String {
    let host = hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unknown host>".to_string());
    format!("lpprof report for {} at {}", host, format_time())
}

fn format_time() -> String {
    if let Ok(now) = OffsetDateTime::now_local() {
        let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
        now.format(&format)
            .unwrap_or_else(|_| "0000-00-00 00:00:00".to_string())
    } else {
        "0000-00-00 00:00:00".to_string()
    }
}

/// One table per metric type, rows by descending average, then the text
/// reports of the plugins.
pub fn render(metrics: &MetricsStore, plugin_reports: &[(&str, String)]) -> String {
    let mut out = String::new();

    for metric_type in metrics.metric_types() {
        out.push_str(&format!("\n== {} ==\n", metric_type));
        out.push_str(&format!(
            "{:<name$} {:>value$} {:>value$} {:>value$}\n",
            "metric",
            "min (rank)",
            "max (rank)",
            "avg",
            name = NAME_WIDTH,
            value = VALUE_WIDTH
        ));
        for name in metrics.names_sorted(metric_type) {
            if let Some(summary) = metrics.summary(metric_type, &name) {
                out.push_str(&row(&name, &summary, metric_type.is_ratio()));
            }
        }
    }

    for (plugin, text) in plugin_reports {
        out.push_str(&format!("\n== {} report ==\n", plugin));
        out.push_str(text);
        if !text.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

fn row(name: &str, summary: &MetricSummary, ratio: bool) -> String {
    let suffix = if ratio { "%" } else { "" };
    let value = |v: f64| format!("{:.2}{}", v, suffix);
    let (min, min_rank) = summary.min;
    let (max, max_rank) = summary.max;

    format!(
        "{:<name_w$} {:>value_w$} {:>value_w$} {:>value_w$}\n",
        name,
        format!("{} ({})", value(min), min_rank),
        format!("{} ({})", value(max), max_rank),
        value(summary.avg),
        name_w = NAME_WIDTH,
        value_w = VALUE_WIDTH
    )
}
