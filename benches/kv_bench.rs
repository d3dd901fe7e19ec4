use barrelkv::{
  db::Engine,
  option::Options,
  util::rand_kv::{get_test_key, get_test_value},
};
use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use rand::Rng;
use tempfile::TempDir;

const PRELOAD_KEYS: usize = 100000;

fn open_engine(dir: &TempDir) -> Engine {
  let mut option = Options::default();
  option.dir_path = dir.path().join("barrel");
  option.compaction_interval = None;
  Engine::open(option).unwrap()
}

fn preload(engine: &Engine) {
  for i in 0..PRELOAD_KEYS {
    let res = engine.put(get_test_key(i), get_test_value(i));
    assert!(res.is_ok());
  }
}

fn bench_put(c: &mut Criterion) {
  let dir = tempfile::tempdir().unwrap();
  let engine = open_engine(&dir);
  let mut rnd = rand::rng();

  c.bench_function("barrelkv-put-bench", |b| {
    b.iter(|| {
      let i = rnd.random_range(0..u32::MAX) as usize;
      let res = engine.put(get_test_key(i), get_test_value(i));
      assert!(res.is_ok());
    })
  });
}

fn bench_get(c: &mut Criterion) {
  let dir = tempfile::tempdir().unwrap();
  let engine = open_engine(&dir);
  preload(&engine);
  let mut rnd = rand::rng();

  c.bench_function("barrelkv-get-bench", |b| {
    b.iter(|| {
      let i = rnd.random_range(0..u32::MAX) as usize;
      let res = engine.get(get_test_key(i));
      if i < PRELOAD_KEYS {
        assert!(res.is_ok());
      } else {
        assert!(res.is_err());
      }
    })
  });
}

fn bench_delete(c: &mut Criterion) {
  let dir = tempfile::tempdir().unwrap();
  let engine = open_engine(&dir);
  preload(&engine);
  let mut rnd = rand::rng();

  c.bench_function("barrelkv-delete-bench", |b| {
    b.iter(|| {
      let i = rnd.random_range(0..PRELOAD_KEYS);
      // deleting an absent key is an error, put it back first
      let _ = engine.put(get_test_key(i), Bytes::from("v"));
      engine.delete(get_test_key(i)).unwrap();
    })
  });
}

fn bench_compact(c: &mut Criterion) {
  let dir = tempfile::tempdir().unwrap();
  let engine = open_engine(&dir);
  preload(&engine);

  c.bench_function("barrelkv-compact-bench", |b| {
    b.iter(|| {
      for i in (0..PRELOAD_KEYS).step_by(10) {
        engine.put(get_test_key(i), get_test_value(i)).unwrap();
      }
      let res = engine.compact_now();
      assert!(res.is_ok());
    })
  });
}

fn bench_stat(c: &mut Criterion) {
  let dir = tempfile::tempdir().unwrap();
  let engine = open_engine(&dir);
  preload(&engine);

  c.bench_function("barrelkv-stat-bench", |b| {
    b.iter(|| {
      let res = engine.stat();
      assert!(res.is_ok());
    })
  });
}

criterion_group!(
  benches,
  bench_get,
  bench_put,
  bench_delete,
  bench_compact,
  bench_stat
);
criterion_main!(benches);
