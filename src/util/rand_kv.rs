use bytes::Bytes;
use rand::Rng;

pub fn get_test_key(i: usize) -> Bytes {
  Bytes::from(std::format!("barrelkv-key-{:09}", i))
}

pub fn get_test_value(i: usize) -> Bytes {
  let suffix: String = rand::rng()
    .sample_iter(&rand::distr::Alphanumeric)
    .take(16)
    .map(char::from)
    .collect();
  Bytes::from(std::format!("barrelkv-value-{:09}-{}", i, suffix))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_get_test_key_value() {
    assert_eq!(get_test_key(7), get_test_key(7));
    assert_ne!(get_test_key(7), get_test_key(8));

    let v = get_test_value(3);
    assert!(v.starts_with(b"barrelkv-value-000000003-"));
    assert_eq!(v.len(), "barrelkv-value-000000003-".len() + 16);
  }
}
