use rust_decimal::{Decimal, RoundingStrategy};

/// How values are rendered in the CLI summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayOptions {
    /// Round half away from zero to this many places and pad to exactly that width.
    pub decimals: Option<u32>,
    /// Insert `,` every three integer digits.
    pub grouping: bool,
}

impl DisplayOptions {
    pub fn new(decimals: Option<u32>) -> Self {
        Self {
            decimals,
            grouping: true,
        }
    }
}

fn round(value: Decimal, decimals: Option<u32>) -> Decimal {
    match decimals {
        Some(dp) => value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero),
        None => value,
    }
}

fn group_thousands(int_part: &str) -> String {
    let len = int_part.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in int_part.chars().enumerate() {
        out.push(ch);
        let remaining = len - i - 1;
        if remaining > 0 && remaining % 3 == 0 {
            out.push(',');
        }
    }
    out
}

fn fixed_fraction(frac: &str, dp: u32) -> String {
    let mut out: String = frac.chars().take(dp as usize).collect();
    while out.len() < dp as usize {
        out.push('0');
    }
    out
}

/// Human display of a value, e.g. `-1,234.50`.
pub fn format_display(value: Decimal, options: DisplayOptions) -> String {
    let rounded = round(value, options.decimals);
    let negative = rounded.is_sign_negative() && !rounded.is_zero();
    let digits = rounded.abs().normalize().to_string();

    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits.as_str(), ""));
    let int_part = if options.grouping {
        group_thousands(int_part)
    } else {
        int_part.to_string()
    };
    let frac_part = match options.decimals {
        Some(dp) => fixed_fraction(frac_part, dp),
        None => frac_part.to_string(),
    };

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(&int_part);
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(&frac_part);
    }
    out
}

/// `2,000.00 USDC`
pub fn format_with_ticker(value: Decimal, ticker: &str, options: DisplayOptions) -> String {
    format!("{} {ticker}", format_display(value, options))
}

/// `$2,000.00`, sign ahead of the symbol for negatives.
pub fn format_usd(value: Decimal, options: DisplayOptions) -> String {
    let display = format_display(value, options);
    match display.strip_prefix('-') {
        Some(abs) => format!("-${abs}"),
        None => format!("${display}"),
    }
}
