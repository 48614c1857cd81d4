//! Short sortable identifiers: `<prefix>_<timestamp base36>_<6 random base36 chars>`.

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

pub fn to_base36(mut n: u128) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

pub fn generate_id(prefix: &str, now_ms: i64) -> String {
    let random = uuid::Uuid::new_v4().as_u128() % 36u128.pow(6);
    format!(
        "{}_{}_{:0>6}",
        prefix,
        to_base36(now_ms.max(0) as u128),
        to_base36(random)
    )
}
