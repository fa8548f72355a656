use error_stack::Report;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::FetchError;
use crate::model::{NotificationPayload, TelegramOptions, TickerSnapshot};

pub const CHANNEL_KEY: &str = "poloniex";
pub const EXCHANGE_NAME: &str = "Poloniex";
const TRADE_PAGE_URL: &str = "https://poloniex.com/exchange#";
/// Poloniex lists every watched instrument against BTC.
pub const QUOTE_CURRENCY: &str = "BTC";

/// Market-pair key used both by the ticker endpoint and the trade page.
pub fn market_pair(instrument: &str) -> String {
    format!("{QUOTE_CURRENCY}_{instrument}")
}

/// Build the notification for a crossing edge.
///
/// Deterministic: the same snapshot always yields the same text. Fails with
/// `MalformedData` when the percent change cannot be scaled to percent.
pub fn build_payload(
    instrument: &str,
    snapshot: &TickerSnapshot,
) -> Result<NotificationPayload, Report<FetchError>> {
    let percent = percent_display(snapshot.percent_change_24h).ok_or_else(|| {
        Report::new(FetchError::MalformedData {
            exchange: CHANNEL_KEY.into(),
        })
        .attach(format!("percentChange: {}", snapshot.percent_change_24h))
    })?;
    let title = format!("{EXCHANGE_NAME}: {instrument} traded as {}", snapshot.last);

    let body = [
        format!("Volume: {}", snapshot.volume),
        format!("24h Change: {percent}%"),
        format!("24h High: {}", snapshot.high_24h),
        format!("24h Low: {}", snapshot.low_24h),
        String::new(),
        format!("{TRADE_PAGE_URL}{}", market_pair(instrument)),
    ]
    .join("\n");

    Ok(NotificationPayload {
        channel_key: CHANNEL_KEY,
        telegram: TelegramOptions {
            title: format!("<b>{}</b>", escape_html(&title)),
            parse_mode: "HTML",
            disable_web_page_preview: true,
        },
        title,
        body,
    })
}

/// Scale a fraction to percent and round to two places. Trailing zeros are
/// dropped but at least one fractional digit is kept (`5.0`, `18.9`).
///
/// `None` when the scaled value does not fit in a `Decimal`.
pub fn percent_display(fraction: Decimal) -> Option<Decimal> {
    let mut percent = fraction
        .checked_mul(Decimal::ONE_HUNDRED)?
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .normalize();
    if percent.scale() == 0 {
        percent.rescale(1);
    }
    Some(percent)
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}
