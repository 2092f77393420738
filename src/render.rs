//! Terminal rendering for live rows and historical reports.

use crate::db::{DeviceInfo, PingWindowStats, RadioMetrics, Sample};
use crate::report::{Histogram, MetricSummary, Report};

use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use std::fmt::{self, Write};

const RULE: &str =
    "================================================================================";

/// Live rows between repeated column headers.
pub const HEADER_INTERVAL: usize = 20;

pub const LEGEND: &str = "
SIGNAL METRICS GUIDE:
---------------------
* BAND:  The frequency band in use.
         n41: High speed, shorter range (Ultra Capacity).
         n25: Balanced speed and range.
         n71: Long range, slower speeds.

* RSRP:  Reference Signal Received Power, the main signal strength.
         Excellent > -80  | Good -80 to -95
         Fair -95 to -110 | Poor < -110 (risk of drops).

* SINR:  Signal-to-Interference-plus-Noise Ratio. Higher is better.
         > 20 is excellent, < 0 means heavy noise.

* RSRQ:  Reference Signal Received Quality. Good SINR with poor RSRQ
         usually means a congested tower.

* CID & gNBID:
         gNBID identifies the physical tower, CID the sector.
";

/// Format a duration as `1h 5m`, `1h`, `5m 3s`, `12m` or `42s`.
///
/// Seconds are only shown below ten minutes.
pub fn format_smart_duration(d: ChronoDuration) -> String {
    let total = ((d.num_milliseconds() as f64) / 1000.0).round().max(0.0) as i64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);

    if h > 0 {
        if m > 0 {
            format!("{}h {}m", h, m)
        } else {
            format!("{}h", h)
        }
    } else if m > 0 {
        if s > 0 && m < 10 {
            format!("{}m {}s", m, s)
        } else {
            format!("{}m", m)
        }
    } else {
        format!("{}s", s)
    }
}

fn local(t: DateTime<Utc>) -> DateTime<Local> {
    t.with_timezone(&Local)
}

/// Left-align columns with two spaces of padding; the last column is not padded.
///
/// Widths come from the widest cell per column so histogram labels of any
/// length line up with their counts.
fn tabulate(out: &mut String, rows: &[Vec<String>]) {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|c| {
            rows.iter()
                .filter_map(|r| r.get(c))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    for row in rows {
        let mut line = String::new();
        for (c, cell) in row.iter().enumerate() {
            if c + 1 == row.len() {
                line.push_str(cell);
            } else {
                let _ = write!(line, "{:<width$}", cell, width = widths[c] + 2);
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
}

fn histogram_rows<K: fmt::Display>(hist: &Histogram<K>, marker: &str) -> Vec<Vec<String>> {
    hist.buckets
        .iter()
        .map(|b| {
            let suffix = if b.live { marker } else { "" };
            vec![
                format!("  {}", b.value),
                format!("{} samples ({:.1}%){}", b.count, b.percent, suffix),
                format_smart_duration(b.share),
            ]
        })
        .collect()
}

fn metric_row(name: &str, m: Option<&MetricSummary>, precision: usize) -> Vec<String> {
    match m {
        Some(m) => vec![
            name.to_string(),
            format!("{:.*}", precision, m.min),
            format!("{:.1}", m.avg),
            format!("{:.*}", precision, m.max),
        ],
        None => vec![name.to_string(), "-".into(), "-".into(), "-".into()],
    }
}

/// Human-readable historical report.
pub fn render_report(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(RULE);
    out.push_str("\n HISTORICAL SIGNAL ANALYSIS\n");
    out.push_str(RULE);
    out.push('\n');

    let (Some(start), Some(end)) = (report.start, report.end) else {
        out.push_str("No data samples found.\n");
        return out;
    };

    if let Some(filter) = report.filter.filter(|f| f.is_bounded()) {
        let bound = |t: Option<DateTime<Utc>>, open: &str| {
            t.map(|t| local(t).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| open.to_string())
        };
        let _ = writeln!(
            out,
            "Filter:        {} to {}",
            bound(filter.start, "Begin"),
            bound(filter.end, "End")
        );
    }
    let _ = writeln!(
        out,
        "Data Range:    {} to {}",
        local(start).format("%Y-%m-%d %H:%M:%S"),
        local(end).format("%H:%M:%S")
    );
    let duration = report.duration().to_std().unwrap_or_default();
    let _ = writeln!(out, "Duration:      {}", humantime::format_duration(duration));
    let _ = writeln!(out, "Total Samples: {}\n", report.total_samples);

    tabulate(
        &mut out,
        &[
            vec!["METRIC".into(), "MIN".into(), "AVG".into(), "MAX".into()],
            vec!["------".into(), "---".into(), "---".into(), "---".into()],
            metric_row("RSRP (dBm)", report.rsrp.as_ref(), 0),
            metric_row("SINR (dB)", report.sinr.as_ref(), 0),
            metric_row("Ping (ms)", report.ping.as_ref(), 1),
        ],
    );

    if let Some(loss) = report.loss_percent() {
        out.push_str("\nRELIABILITY:\n");
        let _ = writeln!(
            out,
            "  Packet Loss: {} / {} ({:.2}%)",
            report.ping_lost, report.ping_sent, loss
        );
    }

    out.push_str("\nBANDS SEEN:\n");
    tabulate(&mut out, &histogram_rows(&report.bands, ""));
    out.push_str("\nTOWERS SEEN:\n");
    tabulate(&mut out, &histogram_rows(&report.towers, " live"));
    out.push_str("\nBARS SEEN:\n");
    tabulate(&mut out, &histogram_rows(&report.bars, " real-time"));

    out.push_str("\nBARS AVG:\n");
    let mut averages = Vec::new();
    if let Some(v) = report.avg_bars {
        averages.push(vec!["Overall".to_string(), format!("{:.1}", v)]);
    }
    if let Some(v) = report.avg_bars_last_hour {
        averages.push(vec!["Last 1h".to_string(), format!("{:.1}", v)]);
    }
    if let Some(v) = report.avg_signal_health {
        averages.push(vec!["SgnlHealth".to_string(), format!("{:.1}", v)]);
    }
    tabulate(&mut out, &averages);

    out.push_str(RULE);
    out.push('\n');
    out
}

pub fn render_report_json(report: &Report) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

pub fn device_banner(device: &DeviceInfo) -> String {
    format!(
        "{rule}\n DEVICE INFO | Model: {:<10} | FW: {:<10} | Serial: {:<15} | MAC: {}\n{rule}",
        device.model,
        device.software_version,
        device.serial,
        device.mac_id,
        rule = RULE
    )
}

pub fn live_header() -> String {
    [
        " TYPE | BANDS      | BARS | RSRP  | SINR  | RSRQ | RSSI | CID   | TWR gNBID/PCID  | PING MIN  AVG   MAX   STD   LOSS",
        "------+------------+------+-------+-------+------+------+-------+-----------------+-------------------------------",
    ]
    .join("\n")
}

fn ping_cell(v: Option<f64>) -> String {
    v.map_or_else(|| format!("{:>5}", "--"), |v| format!("{:5.1}", v))
}

pub fn live_row(kind: &str, radio: &RadioMetrics, ping: &PingWindowStats) -> String {
    let bands = if radio.bands.is_empty() {
        "---".to_string()
    } else {
        radio.bands.join(",")
    };
    format!(
        "  {:<3} | {:<10} | {:>4.1} | {:>5} | {:>5} | {:<4} | {:<4} | {:<5} | {:<15} | {} {} {} {:5.1} {:5.1}%",
        kind,
        bands,
        radio.bars,
        radio.rsrp,
        radio.sinr,
        radio.rsrq,
        radio.rssi,
        radio.cid,
        radio.display_tower(),
        ping_cell(ping.min),
        ping_cell(ping.avg),
        ping_cell(ping.max),
        ping.stddev,
        ping.loss,
    )
}

/// One row for 5G, plus one for 4G when that connection is active.
pub fn live_rows(sample: &Sample) -> Vec<String> {
    let mut rows = vec![live_row("5G", sample.five_g(), &sample.ping)];
    if sample.four_g().is_active() {
        rows.push(live_row("4G", sample.four_g(), &sample.ping));
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::GatewayResponse;
    use crate::report::{analyze, TimeFilter};

    #[test]
    fn test_format_smart_duration() {
        let cases = [
            (ChronoDuration::seconds(3900), "1h 5m"),
            (ChronoDuration::hours(1), "1h"),
            (ChronoDuration::seconds(303), "5m 3s"),
            (ChronoDuration::seconds(12 * 60 + 30), "12m"),
            (ChronoDuration::seconds(42), "42s"),
            (ChronoDuration::milliseconds(1_600), "2s"),
            (ChronoDuration::zero(), "0s"),
        ];
        for (d, expected) in cases {
            assert_eq!(format_smart_duration(d), expected);
        }
    }

    fn sample(ts: i64, rsrp: i32, bars: f64, tower: i64) -> Sample {
        let mut gateway = GatewayResponse::default();
        gateway.time.local_time = ts;
        gateway.signal.five_g = RadioMetrics {
            bands: vec!["n41".into()],
            bars,
            rsrp,
            sinr: 10,
            gnbid: tower,
            ..Default::default()
        };
        Sample::new(
            gateway,
            PingWindowStats {
                avg: Some(20.0),
                min: Some(18.0),
                max: Some(25.0),
                sent: 10,
                received: 9,
                loss: 10.0,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_empty_report() {
        let text = render_report(&Report::default());
        assert!(text.contains("HISTORICAL SIGNAL ANALYSIS"));
        assert!(text.contains("No data samples found."));
        assert!(!text.contains("BANDS SEEN"));
    }

    #[test]
    fn test_report_sections() {
        let samples = vec![
            sample(1_736_157_600, -100, 3.0, 100),
            sample(1_736_157_600 + 1800, -95, 3.0, 100),
            sample(1_736_157_600 + 3600, -90, 4.0, 200),
        ];
        let text = render_report(&analyze(&samples, None));

        assert!(text.contains("Total Samples: 3"));
        assert!(text.contains("Duration:      1h"));
        assert!(text.contains("Packet Loss: 3 / 30 (10.00%)"));
        assert!(text.contains("1 samples (33.3%) live"));
        assert!(text.contains("2 samples (66.7%)  "));
        assert!(text.contains("1 samples (33.3%) real-time"));
        assert!(text.contains("Last 1h"));
        assert!(!text.contains("Filter:"));
        assert!(text.contains("40m"));
    }

    #[test]
    fn test_report_shows_filter_line() {
        let samples = vec![sample(1_736_157_600, -100, 3.0, 100)];
        let filter = TimeFilter::new(DateTime::from_timestamp(1_736_157_000, 0), None);
        let text = render_report(&analyze(&samples, Some(&filter)));
        assert!(text.contains("Filter:"));
        assert!(text.contains(" to End"));
        assert!(!text.contains("Last 1h"));
    }

    #[test]
    fn test_tabulate_aligns_columns() {
        let mut out = String::new();
        tabulate(
            &mut out,
            &[
                vec!["a".into(), "bb".into(), "c".into()],
                vec!["aaaa".into(), "b".into(), "c".into()],
            ],
        );
        assert_eq!(out, "a     bb  c\naaaa  b   c\n");
    }

    #[test]
    fn test_live_rows() {
        let mut s = sample(1_736_157_600, -100, 3.0, 0);
        s.gateway.signal.five_g.pcid = 321;
        assert_eq!(live_rows(&s).len(), 1);
        assert!(live_rows(&s)[0].contains("321"));
        assert!(live_rows(&s)[0].contains("n41"));

        s.gateway.signal.four_g.bands = vec!["b66".into()];
        let rows = live_rows(&s);
        assert_eq!(rows.len(), 2);
        assert!(rows[1].starts_with("  4G"));
    }

    #[test]
    fn test_live_row_without_pings() {
        let row = live_row("5G", &RadioMetrics::default(), &PingWindowStats::default());
        assert!(row.contains("---"));
        assert!(row.contains("   --"));
    }
}
