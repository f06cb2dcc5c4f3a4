//! Interpretation of `INTERNALDATE` values.

use abnf_core::is_digit;
use chrono::{DateTime, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while_m_n},
    character::complete::char,
    combinator::{all_consuming, map_opt, value},
    sequence::{preceded, tuple},
    IResult,
};

/// Parse an (unquoted) IMAP `date-time`, e.g., `17-Jul-1996 02:44:25 -0700`.
///
/// Returns `None` for anything that is not a valid point in time.
pub fn parse_date_time(input: &str) -> Option<DateTime<FixedOffset>> {
    let (_, (d, _, m, _, y, _, time, _, zone)) = all_consuming(tuple((
        date_day_fixed,
        tag(b"-"),
        date_month,
        tag(b"-"),
        date_year,
        char(' '),
        time,
        char(' '),
        zone,
    )))(input.as_bytes())
    .ok()?;

    let date = NaiveDate::from_ymd_opt(y.into(), m.into(), d.into())?;
    let local_datetime = NaiveDateTime::new(date, time?);

    match zone?.from_local_datetime(&local_datetime) {
        LocalResult::Single(datetime) => Some(datetime),
        _ => None,
    }
}

/// ```abnf
/// date-day-fixed = (SP DIGIT) / 2DIGIT
/// ```
///
/// A single digit without padding is accepted, too.
fn date_day_fixed(input: &[u8]) -> IResult<&[u8], u8> {
    alt((preceded(char(' '), digits(1, 1)), digits(1, 2)))(input)
}

/// ```abnf
/// date-month = "Jan" / "Feb" / "Mar" / "Apr" /
///              "May" / "Jun" / "Jul" / "Aug" /
///              "Sep" / "Oct" / "Nov" / "Dec"
/// ```
fn date_month(input: &[u8]) -> IResult<&[u8], u8> {
    alt((
        value(1, tag_no_case(b"Jan")),
        value(2, tag_no_case(b"Feb")),
        value(3, tag_no_case(b"Mar")),
        value(4, tag_no_case(b"Apr")),
        value(5, tag_no_case(b"May")),
        value(6, tag_no_case(b"Jun")),
        value(7, tag_no_case(b"Jul")),
        value(8, tag_no_case(b"Aug")),
        value(9, tag_no_case(b"Sep")),
        value(10, tag_no_case(b"Oct")),
        value(11, tag_no_case(b"Nov")),
        value(12, tag_no_case(b"Dec")),
    ))(input)
}

/// ```abnf
/// date-year = 4DIGIT
/// ```
fn date_year(input: &[u8]) -> IResult<&[u8], u16> {
    digits(4, 4)(input)
}

/// ```abnf
/// time = 2DIGIT ":" 2DIGIT ":" 2DIGIT
/// ```
fn time(input: &[u8]) -> IResult<&[u8], Option<NaiveTime>> {
    let (remaining, (h, _, m, _, s)) =
        tuple((digits(2, 2), tag(b":"), digits(2, 2), tag(b":"), digits(2, 2)))(input)?;

    Ok((remaining, NaiveTime::from_hms_opt(h, m, s)))
}

/// Signed four-digit value of hhmm representing hours and minutes east of Greenwich.
///
/// ```abnf
/// zone = ("+" / "-") 4DIGIT
/// ```
fn zone(input: &[u8]) -> IResult<&[u8], Option<FixedOffset>> {
    let (remaining, (sign, hh, mm)) = tuple((
        alt((char('+'), char('-'))),
        digits::<i32>(2, 2),
        digits::<i32>(2, 2),
    ))(input)?;

    let offset = 3600 * hh + 60 * mm;

    let zone = if sign == '+' {
        FixedOffset::east_opt(offset)
    } else {
        FixedOffset::west_opt(offset)
    };

    Ok((remaining, zone))
}

fn digits<'a, N: std::str::FromStr>(
    min: usize,
    max: usize,
) -> impl FnMut(&'a [u8]) -> IResult<&'a [u8], N> {
    map_opt(take_while_m_n(min, max, is_digit), |bytes: &[u8]| {
        std::str::from_utf8(bytes).ok()?.parse().ok()
    })
}
