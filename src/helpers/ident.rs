use chrono::{Datelike, Timelike, Utc};
use rand::Rng;

use crate::value::Value;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

fn char_at(index: usize) -> char {
    CHARSET[index % CHARSET.len()] as char
}

/// `$id` helper: a pseudo-unique alphanumeric identifier of the requested
/// length. Coarse time units front-load the id, random characters back-fill
/// it; minimum length is 4.
pub(crate) fn generate(len_arg: Option<&Value>) -> Value {
    let requested = len_arg.and_then(Value::as_number).unwrap_or(12.0);
    let len = if requested.is_nan() || requested < 4.0 {
        4
    } else {
        requested as usize
    };

    let now = Utc::now();
    let mut rng = rand::thread_rng();

    let mut id = String::with_capacity(len);
    id.push(char_at(now.minute() as usize));
    id.push(char_at(now.second() as usize));
    for _ in 0..2 {
        id.push(char_at(rng.gen_range(0..CHARSET.len())));
    }

    let extra = len - 4;
    let time_factors = [
        now.hour() as usize,
        now.weekday().num_days_from_sunday() as usize,
        now.month0() as usize,
        (now.year().rem_euclid(100)) as usize,
    ];
    let prepended = (extra / 2).min(time_factors.len());
    for factor in time_factors.iter().take(prepended) {
        id.insert(0, char_at(*factor));
    }
    for _ in 0..(extra - prepended) {
        id.push(char_at(rng.gen_range(0..CHARSET.len())));
    }
    Value::String(id)
}
