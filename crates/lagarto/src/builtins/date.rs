//! The `Date` constructor and `Date.prototype`, `chrono`-backed.
//!
//! Instances store milliseconds since the epoch; getters read out the UTC
//! calendar fields. Parsing accepts the ISO subset `toISOString` emits.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use super::{add_method, arg_string, setup_builtin_object};
use crate::{
    context::Context,
    engine::Engine,
    heap::{HeapData, HeapId},
    object::{Obj, ObjectKind},
    value::Value,
    Run,
};

pub(crate) fn setup(vm: &mut Engine) {
    let prototype = vm.prototypes.date;
    let constructor = setup_builtin_object(vm, "Date", constructor, -7, prototype);
    add_method(vm, constructor, "now", now, 0);
    add_method(vm, constructor, "parse", parse, 1);
    add_method(vm, constructor, "UTC", utc, -7);

    add_method(vm, prototype, "toString", to_iso_string, 0);
    add_method(vm, prototype, "toISOString", to_iso_string, 0);
    add_method(vm, prototype, "valueOf", value_of, 0);
    add_method(vm, prototype, "getTime", value_of, 0);
    add_method(vm, prototype, "setTime", set_time, 1);
    add_method(vm, prototype, "getFullYear", get_full_year, 0);
    add_method(vm, prototype, "getMonth", get_month, 0);
    add_method(vm, prototype, "getDate", get_date, 0);
    add_method(vm, prototype, "getDay", get_day, 0);
    add_method(vm, prototype, "getHours", get_hours, 0);
    add_method(vm, prototype, "getMinutes", get_minutes, 0);
    add_method(vm, prototype, "getSeconds", get_seconds, 0);
    add_method(vm, prototype, "getMilliseconds", get_milliseconds, 0);
}

fn now_ms() -> f64 {
    Utc::now().timestamp_millis() as f64
}

fn fields_to_ms(fields: &[f64]) -> f64 {
    let year = fields.first().copied().unwrap_or(f64::NAN);
    let month = fields.get(1).copied().unwrap_or(0.0);
    let day = fields.get(2).copied().unwrap_or(1.0);
    let hour = fields.get(3).copied().unwrap_or(0.0);
    let minute = fields.get(4).copied().unwrap_or(0.0);
    let second = fields.get(5).copied().unwrap_or(0.0);
    let ms = fields.get(6).copied().unwrap_or(0.0);

    if [year, month, day, hour, minute, second, ms].iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let base = Utc
        .with_ymd_and_hms(year as i32, 1, 1, 0, 0, 0)
        .single()
        .map(|dt| dt.timestamp_millis() as f64);
    let Some(base) = base else {
        return f64::NAN;
    };
    // Month and day offsets are applied arithmetically so out-of-range
    // fields roll over the way script expects.
    let days_for_months = (0..month as i64).fold(0.0, |acc, m| {
        let month_index = (m % 12) as u32;
        acc + f64::from(days_in_month(year as i32, month_index))
    });
    base + (days_for_months + (day - 1.0)) * 86_400_000.0
        + hour * 3_600_000.0
        + minute * 60_000.0
        + second * 1000.0
        + ms
}

fn days_in_month(year: i32, month_index: u32) -> u32 {
    match month_index {
        0 | 2 | 4 | 6 | 7 | 9 | 11 => 31,
        3 | 5 | 8 | 10 => 30,
        _ => {
            if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 {
                29
            } else {
                28
            }
        }
    }
}

fn constructor(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let count = cx.argument_count(vm);
    let ms = match count {
        0 => now_ms(),
        1 => {
            let first = cx.argument(vm, 0);
            if first.is_string() {
                parse_ms(crate::value::string_slice(vm, &first))
            } else {
                crate::value::to_binary(cx, vm, first)?
            }
        }
        _ => {
            let mut fields = Vec::with_capacity(count);
            for index in 0..count.min(7) {
                fields.push(super::arg_binary(cx, vm, index)?);
            }
            fields_to_ms(&fields)
        }
    };

    if cx.construct {
        let obj = Obj::with_kind(ObjectKind::Date(ms), Some(vm.prototypes.date));
        Ok(Value::Object(vm.heap.allocate(HeapData::Object(obj))))
    } else {
        // Called as a function, Date ignores its arguments and yields the
        // current time as a string.
        let formatted = format_iso(now_ms());
        Ok(vm.string_value(&formatted))
    }
}

fn parse_ms(bytes: &str) -> f64 {
    DateTime::parse_from_rfc3339(bytes.trim())
        .map(|dt| dt.timestamp_millis() as f64)
        .unwrap_or(f64::NAN)
}

fn format_iso(ms: f64) -> String {
    if ms.is_nan() {
        return "Invalid Date".to_owned();
    }
    match Utc.timestamp_millis_opt(ms as i64).single() {
        Some(dt) => format!(
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
            dt.year(),
            dt.month(),
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second(),
            dt.timestamp_subsec_millis()
        ),
        None => "Invalid Date".to_owned(),
    }
}

fn now(_cx: &mut Context<'_>, _vm: &mut Engine) -> Run<Value> {
    Ok(Value::Binary(now_ms()))
}

fn parse(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let bytes = arg_string(cx, vm, 0)?;
    Ok(Value::Binary(parse_ms(&bytes)))
}

fn utc(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let count = cx.argument_count(vm);
    let mut fields = Vec::with_capacity(count);
    for index in 0..count.min(7) {
        fields.push(super::arg_binary(cx, vm, index)?);
    }
    Ok(Value::Binary(fields_to_ms(&fields)))
}

fn this_ms(cx: &mut Context<'_>, vm: &mut Engine) -> Run<f64> {
    let id = cx.this_kind(vm, "Date", |kind| matches!(kind, ObjectKind::Date(_)))?;
    match vm.heap.object(id).kind {
        ObjectKind::Date(ms) => Ok(ms),
        _ => unreachable!("checked above"),
    }
}

fn this_datetime(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Option<DateTime<Utc>>> {
    let ms = this_ms(cx, vm)?;
    if ms.is_nan() {
        return Ok(None);
    }
    Ok(Utc.timestamp_millis_opt(ms as i64).single())
}

fn to_iso_string(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let ms = this_ms(cx, vm)?;
    let formatted = format_iso(ms);
    Ok(vm.string_value(&formatted))
}

fn value_of(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    Ok(Value::Binary(this_ms(cx, vm)?))
}

fn set_time(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
    let ms = super::arg_binary(cx, vm, 0)?;
    let id = cx.this_kind(vm, "Date", |kind| matches!(kind, ObjectKind::Date(_)))?;
    vm.heap.object_mut(id).kind = ObjectKind::Date(ms);
    Ok(Value::Binary(ms))
}

macro_rules! date_getter {
    ($name:ident, $extract:expr) => {
        fn $name(cx: &mut Context<'_>, vm: &mut Engine) -> Run<Value> {
            match this_datetime(cx, vm)? {
                Some(dt) => {
                    let extract: fn(DateTime<Utc>) -> i32 = $extract;
                    Ok(Value::Integer(extract(dt)))
                }
                None => Ok(Value::Binary(f64::NAN)),
            }
        }
    };
}

date_getter!(get_full_year, |dt| dt.year());
date_getter!(get_month, |dt| dt.month0() as i32);
date_getter!(get_date, |dt| dt.day() as i32);
date_getter!(get_day, |dt| dt.weekday().num_days_from_sunday() as i32);
date_getter!(get_hours, |dt| dt.hour() as i32);
date_getter!(get_minutes, |dt| dt.minute() as i32);
date_getter!(get_seconds, |dt| dt.second() as i32);
date_getter!(get_milliseconds, |dt| dt.timestamp_subsec_millis() as i32);
