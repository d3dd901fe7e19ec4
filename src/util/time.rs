use std::time::Duration;

use time::OffsetDateTime;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Current wall clock in whole seconds since the epoch, saturated into the
/// record header's u32 field.
pub fn now_secs() -> u32 {
  let secs = OffsetDateTime::now_utc().unix_timestamp();
  secs.clamp(0, u32::MAX as i64 - 1) as u32
}

/// Absolute expiry for a TTL starting now. A key reads as expired once
/// `now_secs() >= expiry`, so the deadline is rounded up to the next whole
/// second and the key never expires before `ttl` has elapsed.
pub fn expiry_after(ttl: Duration) -> u32 {
  expiry_from(OffsetDateTime::now_utc().unix_timestamp_nanos(), ttl)
}

fn expiry_from(now_nanos: i128, ttl: Duration) -> u32 {
  let ttl_nanos = (ttl.as_nanos() as i128).max(1);
  let deadline = now_nanos.max(0).saturating_add(ttl_nanos);
  let secs = (deadline + NANOS_PER_SEC - 1) / NANOS_PER_SEC;
  // u32::MAX is reserved for tombstones
  secs.clamp(1, u32::MAX as i128 - 1) as u32
}
