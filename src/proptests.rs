use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::BTreeMap;

use crate::storage::BLOCK_SIZE;

/// Reference model: key -> id, plus the next id to hand out.
#[derive(Clone, Debug)]
struct Model {
    keys: BTreeMap<Vec<u8>, u32>,
    next_id: u32,
}

impl Model {
    fn new() -> Self {
        Self {
            keys: BTreeMap::new(),
            next_id: MIN_KEY_ID,
        }
    }

    fn insert(&mut self, key: &[u8]) -> u32 {
        if let Some(&id) = self.keys.get(key) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.keys.insert(key.to_vec(), id);
        id
    }

    fn slice(
        &self,
        matches: impl Fn(&[u8]) -> bool,
        offset: u32,
        limit: u32,
        descending: bool,
    ) -> Vec<(Vec<u8>, u32)> {
        let mut all: Vec<(Vec<u8>, u32)> = self
            .keys
            .iter()
            .filter(|(k, _)| matches(k.as_slice()))
            .map(|(k, &id)| (k.clone(), id))
            .collect();
        if descending {
            all.reverse();
        }
        all.into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect()
    }
}

fn collect<'a>(cursor: impl Cursor<'a>) -> Vec<(Vec<u8>, u32)> {
    cursor
        .into_keys()
        .map(|k| (k.as_bytes().to_vec(), k.id()))
        .collect()
}

#[derive(Clone, Copy, Debug, Arbitrary)]
enum Direction {
    Ascending,
    Descending,
}

#[derive(Clone, Copy, Debug, Arbitrary)]
struct Bounds {
    except_lower: bool,
    except_upper: bool,
    direction: Direction,
}

impl Bounds {
    fn flags(self) -> CursorFlags {
        let mut flags = CursorFlags::ASCENDING;
        if let Direction::Descending = self.direction {
            flags |= CursorFlags::DESCENDING;
        }
        if self.except_lower {
            flags |= CursorFlags::EXCEPT_LOWER_BOUND;
        }
        if self.except_upper {
            flags |= CursorFlags::EXCEPT_UPPER_BOUND;
        }
        flags
    }
}

#[derive(Clone, Debug)]
enum Op {
    Insert(Vec<u8>),
    Remove(Vec<u8>),
    Lookup(Vec<u8>),
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    // A tiny alphabet with both byte extremes so keys share long prefixes and
    // exercise the terminal label against byte 0x00.
    let byte = prop_oneof![Just(0u8), Just(b'a'), Just(b'b'), Just(b'c'), Just(0xff)];
    prop::collection::vec(byte, 0..=8)
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let key = key_strategy();
    let op = prop_oneof![
        60 => key.clone().prop_map(Op::Insert),
        15 => key.clone().prop_map(Op::Remove),
        25 => key.clone().prop_map(Op::Lookup),
    ];
    prop::collection::vec(op, 0..=400)
}

/// Keys over every byte value, so child sets grow to the full 257 labels.
fn wide_key_strategy() -> impl Strategy<Value = Vec<u8>> + Clone {
    prop::collection::vec(any::<u8>(), 0..=6)
}

fn wide_ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let key = wide_key_strategy();
    let op = prop_oneof![
        60 => key.clone().prop_map(Op::Insert),
        25 => key.clone().prop_map(Op::Remove),
        15 => key.clone().prop_map(Op::Lookup),
    ];
    prop::collection::vec(op, 0..=600)
}

/// Keys sharing `a`-runs of up to 600 bytes: long enough that a tail split
/// can need more cells than a small table holds.
fn long_prefix_key_strategy() -> impl Strategy<Value = Vec<u8>> {
    (0usize..600, prop::collection::vec(any::<u8>(), 0..3)).prop_map(|(run, tail)| {
        let mut key = vec![b'a'; run];
        key.extend(tail);
        key
    })
}

fn used_cells(t: &Trie) -> usize {
    t.num_nodes() - t.num_free_nodes()
}

fn snapshot(t: &Trie) -> Vec<(Vec<u8>, u32)> {
    t.iter().map(|k| (k.as_bytes().to_vec(), k.id())).collect()
}

fn limit_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![Just(u32::MAX), 0u32..12]
}

fn build(keys: &[Vec<u8>]) -> (Trie, Model) {
    let mut t = Trie::with_config(TrieConfig::default().with_initial_nodes(4)).unwrap();
    let mut m = Model::new();
    for k in keys {
        assert_eq!(t.insert(k).unwrap(), m.insert(k));
    }
    (t, m)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(ops in ops_strategy()) {
        let mut t = Trie::with_config(TrieConfig::default().with_initial_nodes(4)).unwrap();
        let mut m = Model::new();

        for op in ops {
            match op {
                Op::Insert(key) => {
                    let before = t.num_keys();
                    let id = t.insert(&key).unwrap();
                    let known = m.keys.contains_key(&key);
                    prop_assert_eq!(id, m.insert(&key));
                    if known {
                        prop_assert_eq!(t.num_keys(), before);
                    }
                }
                Op::Remove(key) => {
                    prop_assert_eq!(t.remove(&key), m.keys.remove(&key).is_some());
                }
                Op::Lookup(key) => {
                    prop_assert_eq!(t.lookup(&key), m.keys.get(&key).copied());
                }
            }
            prop_assert_eq!(t.num_keys(), m.keys.len());
        }

        t.validate();
        let expected: Vec<(Vec<u8>, u32)> = m.keys.iter().map(|(k, &id)| (k.clone(), id)).collect();
        prop_assert_eq!(collect(KeyCursor::full_scan(&t)), expected);
        for (k, &id) in &m.keys {
            prop_assert_eq!(t.get_key(id).as_bytes(), k.as_slice());
        }
    }

    #[test]
    fn prop_key_cursor_matches_slice(
        keys in prop::collection::vec(key_strategy(), 0..60),
        min in key_strategy(),
        max in key_strategy(),
        offset in 0u32..10,
        limit in limit_strategy(),
        bounds in any::<Bounds>(),
    ) {
        let (t, m) = build(&keys);
        let flags = bounds.flags();

        let mut c = KeyCursor::new();
        c.open(&t, &min, &max, offset, limit, flags).unwrap();
        let got = collect(&mut c);

        let in_range = |k: &[u8]| {
            let above = min.is_empty()
                || (k > min.as_slice() || (k == min.as_slice() && !bounds.except_lower));
            let below = max.is_empty()
                || (k < max.as_slice() || (k == max.as_slice() && !bounds.except_upper));
            above && below
        };
        let expected = m.slice(in_range, offset, limit, flags.is_descending());
        prop_assert_eq!(got, expected);
        prop_assert!(!c.next().is_valid());
    }

    #[test]
    fn prop_predictive_cursor_matches_slice(
        keys in prop::collection::vec(key_strategy(), 0..60),
        prefix in key_strategy(),
        offset in 0u32..10,
        limit in limit_strategy(),
        descending in any::<bool>(),
        except_exact in any::<bool>(),
    ) {
        let (t, m) = build(&keys);
        let mut flags = CursorFlags::ASCENDING;
        if descending {
            flags |= CursorFlags::DESCENDING;
        }
        if except_exact {
            flags |= CursorFlags::EXCEPT_EXACT_MATCH;
        }

        let mut c = PredictiveCursor::new();
        c.open(&t, &prefix, offset, limit, flags).unwrap();
        let got = collect(&mut c);

        let matches = |k: &[u8]| k.starts_with(&prefix) && !(except_exact && k == prefix.as_slice());
        prop_assert_eq!(got, m.slice(matches, offset, limit, descending));
    }

    #[test]
    fn prop_prefix_cursor_matches_slice(
        keys in prop::collection::vec(key_strategy(), 0..60),
        query in key_strategy(),
        min_length in 0usize..4,
        descending in any::<bool>(),
    ) {
        let (t, m) = build(&keys);
        let flags = if descending { CursorFlags::DESCENDING } else { CursorFlags::ASCENDING };

        let mut c = PrefixCursor::new();
        c.open(&t, &query, min_length, 0, u32::MAX, flags).unwrap();
        let got = collect(&mut c);

        // Prefixes of one query are totally ordered by length and bytes alike.
        let matches = |k: &[u8]| query.starts_with(k) && k.len() >= min_length;
        prop_assert_eq!(got, m.slice(matches, 0, u32::MAX, descending));

        let longest = m.slice(|k| query.starts_with(k), 0, 1, true);
        let lcp = t.lcp_search(&query);
        prop_assert_eq!(
            longest.first().map(|(k, id)| (k.clone(), *id)),
            lcp.is_valid().then(|| (lcp.as_bytes().to_vec(), lcp.id()))
        );
    }

    #[test]
    fn prop_offset_drops_leading_results(
        keys in prop::collection::vec(key_strategy(), 0..40),
        offset in 0u32..50,
        descending in any::<bool>(),
    ) {
        let (t, _) = build(&keys);
        let flags = if descending { CursorFlags::DESCENDING } else { CursorFlags::ASCENDING };
        let open = |offset| {
            let mut c = KeyCursor::new();
            c.open(&t, b"", b"", offset, u32::MAX, flags).unwrap();
            collect(c)
        };
        let all = open(0);
        let skipped: Vec<_> = all.iter().skip(offset as usize).cloned().collect();
        prop_assert_eq!(open(offset), skipped);
    }

    #[test]
    fn prop_zero_limit_is_empty(
        keys in prop::collection::vec(key_strategy(), 0..20),
        bound in key_strategy(),
        offset in 0u32..5,
        descending in any::<bool>(),
    ) {
        let (t, _) = build(&keys);
        let flags = if descending { CursorFlags::DESCENDING } else { CursorFlags::ASCENDING };

        let mut k = KeyCursor::new();
        k.open(&t, &bound, b"", offset, 0, flags).unwrap();
        prop_assert!(!k.next().is_valid());

        let mut p = PredictiveCursor::new();
        p.open(&t, &bound, offset, 0, flags).unwrap();
        prop_assert!(!p.next().is_valid());

        let mut i = IdCursor::new();
        i.open(&t, 0, 0, offset, 0, flags).unwrap();
        prop_assert!(!i.next().is_valid());
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_wide_equivalence_and_bounded_growth(ops in wide_ops_strategy()) {
        let mut t = Trie::new();
        let mut m = Model::new();

        for op in ops {
            match op {
                Op::Insert(key) => {
                    prop_assert_eq!(t.insert(&key).unwrap(), m.insert(&key));
                }
                Op::Remove(key) => {
                    prop_assert_eq!(t.remove(&key), m.keys.remove(&key).is_some());
                }
                Op::Lookup(key) => {
                    prop_assert_eq!(t.lookup(&key), m.keys.get(&key).copied());
                }
            }
            // Each key costs at most one cell per byte plus its fork.
            let bound = 4 * BLOCK_SIZE + 8 * t.max_key_id() as usize;
            prop_assert!(t.num_nodes() <= bound, "{} cells, bound {}", t.num_nodes(), bound);
        }

        t.validate();
        let expected: Vec<(Vec<u8>, u32)> = m.keys.iter().map(|(k, &id)| (k.clone(), id)).collect();
        prop_assert_eq!(snapshot(&t), expected.clone());

        let mut reversed = expected;
        reversed.reverse();
        let mut c = PredictiveCursor::new();
        c.open(&t, b"", 0, u32::MAX, CursorFlags::DESCENDING).unwrap();
        prop_assert_eq!(collect(c), reversed);
    }

    #[test]
    fn prop_failed_insert_changes_nothing(
        keys in prop::collection::vec(long_prefix_key_strategy(), 1..40),
    ) {
        let config = TrieConfig::default().with_max_nodes(2 * BLOCK_SIZE);
        let mut t = Trie::with_config(config).unwrap();
        let mut m = Model::new();

        for key in keys {
            let before = snapshot(&t);
            let used = used_cells(&t);
            let max_id = t.max_key_id();
            match t.insert(&key) {
                Ok(id) => {
                    prop_assert_eq!(id, m.insert(&key));
                }
                Err(err) => {
                    prop_assert!(err.is_resource_exhausted());
                    prop_assert_eq!(used_cells(&t), used);
                    prop_assert_eq!(t.max_key_id(), max_id);
                    prop_assert_eq!(snapshot(&t), before);
                }
            }
            prop_assert!(t.num_nodes() <= 2 * BLOCK_SIZE);
        }
        t.validate();
        for (k, &id) in &m.keys {
            prop_assert_eq!(t.lookup(k), Some(id));
        }
    }
}

const RACES: [&str; 7] = ["Werdna", "Trebor", "Human", "Elf", "Dwarf", "Gnome", "Hobbit"];

fn races() -> Trie {
    let mut t = Trie::new();
    for (i, race) in RACES.iter().enumerate() {
        assert_eq!(t.insert(race.as_bytes()).unwrap(), i as u32 + 1);
    }
    t
}

fn ids<'a>(cursor: impl Cursor<'a>) -> Vec<u32> {
    cursor.into_keys().map(|k| k.id()).collect()
}

#[test]
fn full_range_both_directions() {
    let t = races();
    let mut c = KeyCursor::new();
    c.open(&t, b"", b"", 0, u32::MAX, CursorFlags::ASCENDING).unwrap();
    assert_eq!(ids(&mut c), vec![5, 4, 6, 7, 3, 2, 1]);
    c.open(&t, b"", b"", 0, u32::MAX, CursorFlags::DESCENDING).unwrap();
    assert_eq!(ids(&mut c), vec![1, 2, 3, 7, 6, 4, 5]);
}

#[test]
fn offsets_slice_the_full_range() {
    let t = races();
    let all = [5, 4, 6, 7, 3, 2, 1];
    for k in 0..=10u32 {
        let mut c = KeyCursor::new();
        c.open(&t, b"", b"", k, u32::MAX, CursorFlags::ASCENDING).unwrap();
        let expected: Vec<u32> = all.iter().copied().skip(k as usize).collect();
        assert_eq!(ids(c), expected, "offset {k}");
    }
}

#[test]
fn bounded_range_with_exclusions() {
    let t = races();
    let mut c = KeyCursor::new();
    c.open(&t, b"Gnome", b"Trebor", 0, u32::MAX, CursorFlags::ASCENDING).unwrap();
    assert_eq!(ids(&mut c), vec![6, 7, 3, 2]);
    let except = CursorFlags::EXCEPT_LOWER_BOUND | CursorFlags::EXCEPT_UPPER_BOUND;
    c.open(&t, b"Gnome", b"Trebor", 0, u32::MAX, except).unwrap();
    assert_eq!(ids(&mut c), vec![7, 3]);
}

#[test]
fn predictive_matches_full_range() {
    let t = races();
    let mut p = PredictiveCursor::new();
    p.open(&t, b"", 0, u32::MAX, CursorFlags::ASCENDING).unwrap();
    assert_eq!(ids(&mut p), vec![5, 4, 6, 7, 3, 2, 1]);
    p.open(&t, b"Z", 0, u32::MAX, CursorFlags::ASCENDING).unwrap();
    assert_eq!(ids(&mut p), Vec::<u32>::new());
    p.open(&t, b"Elf", 0, u32::MAX, CursorFlags::ASCENDING).unwrap();
    assert_eq!(ids(&mut p), vec![4]);
}

#[test]
fn exhausted_cursors_stay_exhausted() {
    let t = races();
    let mut k = KeyCursor::new();
    k.open(&t, b"W", b"", 0, u32::MAX, CursorFlags::ASCENDING).unwrap();
    let mut p = PredictiveCursor::new();
    p.open(&t, b"W", 0, u32::MAX, CursorFlags::ASCENDING).unwrap();

    let cursors: [&mut dyn Cursor<'_>; 2] = [&mut k, &mut p];
    for c in cursors {
        assert_eq!(c.next().id(), 1);
        for _ in 0..5 {
            assert!(!c.next().is_valid());
            assert_eq!(c.state(), CursorState::Exhausted);
        }
        c.close();
        assert_eq!(c.state(), CursorState::Closed);
        assert_eq!(c.offset(), 0);
        assert_eq!(c.limit(), u32::MAX);
        assert_eq!(c.flags(), CursorFlags::ASCENDING);
    }
}

#[test]
fn insert_lookup_round_trip() {
    let mut t = races();
    for (i, race) in RACES.iter().enumerate() {
        let id = i as u32 + 1;
        assert_eq!(t.lookup(race.as_bytes()), Some(id));
        assert_eq!(t.insert(race.as_bytes()).unwrap(), id);
        assert_eq!(t.num_keys(), RACES.len());
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys: Vec<Vec<u8>> = vec![
        b"".to_vec(),
        b"a".to_vec(),
        b"b".to_vec(),
        b"aa".to_vec(),
        b"ab".to_vec(),
        b"a\0".to_vec(),
        b"ba".to_vec(),
    ];

    for_each_permutation(&keys, |perm| {
        let mut t = Trie::with_config(TrieConfig::default().with_initial_nodes(2)).unwrap();
        let mut m = Model::new();
        for k in &perm {
            assert_eq!(t.insert(k).unwrap(), m.insert(k));
        }

        t.validate();
        let expected: Vec<(Vec<u8>, u32)> = m.keys.iter().map(|(k, &id)| (k.clone(), id)).collect();
        assert_eq!(collect(KeyCursor::full_scan(&t)), expected);
        let mut reversed = expected;
        reversed.reverse();
        let mut c = PredictiveCursor::new();
        c.open(&t, b"", 0, u32::MAX, CursorFlags::DESCENDING).unwrap();
        assert_eq!(collect(c), reversed);
    });
}

#[test]
fn exhaustive_remove_order_small_set() {
    let keys: Vec<Vec<u8>> = vec![
        b"".to_vec(),
        b"a".to_vec(),
        b"b".to_vec(),
        b"aa".to_vec(),
        b"ab".to_vec(),
        b"ba".to_vec(),
    ];

    // Insert in a fixed order, then remove in all permutations.
    let (base_trie, base_model) = build(&keys);

    for_each_permutation(&keys, |perm| {
        let mut t = base_trie.clone();
        let mut m = base_model.clone();

        for k in perm {
            assert_eq!(t.remove(&k), m.keys.remove(&k).is_some());
            assert_eq!(t.num_keys(), m.keys.len());
            t.validate();
            let expected: Vec<Vec<u8>> = m.keys.keys().cloned().collect();
            let got: Vec<Vec<u8>> = t.iter().map(|k| k.as_bytes().to_vec()).collect();
            assert_eq!(got, expected);
        }
        assert!(t.is_empty());
        assert_eq!(t.max_key_id(), keys.len() as u32);
        // Emptied branches are freed: only the root is left.
        assert_eq!(used_cells(&t), 1);
    });
}

#[test]
fn full_fanout_both_directions() {
    let mut t = Trie::new();
    let mut m = Model::new();
    let mut keys: Vec<Vec<u8>> = vec![Vec::new()];
    for b in (0..=255u8).rev() {
        keys.push(vec![b]);
        keys.push(vec![b, 0]);
        keys.push(vec![b, 255, b]);
    }
    for k in &keys {
        assert_eq!(t.insert(k).unwrap(), m.insert(k));
    }
    t.validate();

    let expected: Vec<(Vec<u8>, u32)> = m.keys.iter().map(|(k, &id)| (k.clone(), id)).collect();
    assert_eq!(collect(KeyCursor::full_scan(&t)), expected);

    let mut reversed = expected.clone();
    reversed.reverse();
    let mut p = PredictiveCursor::new();
    p.open(&t, b"", 0, u32::MAX, CursorFlags::DESCENDING).unwrap();
    assert_eq!(collect(&mut p), reversed);

    let mut k = KeyCursor::new();
    k.open(&t, &[0x10], &[0xf0, 0xff], 0, u32::MAX, CursorFlags::DESCENDING)
        .unwrap();
    let in_range = |key: &[u8]| key >= &[0x10][..] && key <= &[0xf0, 0xff][..];
    assert_eq!(collect(&mut k), m.slice(in_range, 0, u32::MAX, true));

    // Thin the fanout out from both ends and the middle.
    for b in [0u8, 255, 128, 1, 254] {
        for key in [vec![b], vec![b, 0], vec![b, 255, b]] {
            assert!(t.remove(&key));
            m.keys.remove(&key);
        }
    }
    t.validate();
    let mut p = PredictiveCursor::new();
    p.open(&t, b"", 0, u32::MAX, CursorFlags::DESCENDING).unwrap();
    assert_eq!(collect(&mut p), m.slice(|_| true, 0, u32::MAX, true));
}
