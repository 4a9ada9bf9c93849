use super::*;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Ids the operations touch. Everything at or above it must stay uncached.
const SPACE: ObjectId = 64;

fn cache(order: u16, max_size: u64) -> CacheTree {
    CacheTree::with_config(Config {
        order,
        ttl: Duration::from_secs(3600),
        max_size,
        background_eviction: false,
        ..Config::default()
    })
    .unwrap()
}

/// Owner of every id in `0..=space`; id `space` stands for the rest of the
/// id space and is always uncached.
struct Model {
    owners: Vec<OwnerId>,
}

impl Model {
    fn new(space: ObjectId) -> Self {
        Self {
            owners: vec![INVALID_OWNER; space as usize + 1],
        }
    }

    fn set(&mut self, start: ObjectId, end: ObjectId, owner: OwnerId) {
        for o in &mut self.owners[start as usize..=end as usize] {
            *o = owner;
        }
    }

    /// Maximal run of equal owners around `id`.
    fn run(&self, id: ObjectId) -> (ObjectId, ObjectId) {
        let i = id as usize;
        let owner = self.owners[i];
        let mut start = i;
        while start > 0 && self.owners[start - 1] == owner {
            start -= 1;
        }
        let mut end = i;
        while end + 1 < self.owners.len() && self.owners[end + 1] == owner {
            end += 1;
        }
        (start as ObjectId, end as ObjectId)
    }

    fn metadata(&self, id: ObjectId) -> Option<RangeInfo> {
        let owner = self.owners[id as usize];
        if owner == INVALID_OWNER {
            return None;
        }
        let (start, end) = self.run(id);
        Some(RangeInfo { owner, start, end })
    }

    fn invalidate_range(&mut self, id: ObjectId) -> Option<RangeInfo> {
        let range = self.metadata(id)?;
        self.set(range.start, range.end, INVALID_OWNER);
        Some(range)
    }

    fn invalidate_peer(&mut self, owner: OwnerId) -> usize {
        if owner == INVALID_OWNER {
            return 0;
        }
        let runs = self.runs_of(owner);
        for o in &mut self.owners {
            if *o == owner {
                *o = INVALID_OWNER;
            }
        }
        runs
    }

    fn runs_of(&self, owner: OwnerId) -> usize {
        let mut runs = 0;
        for (i, &o) in self.owners.iter().enumerate() {
            if o == owner && (i == 0 || self.owners[i - 1] != owner) {
                runs += 1;
            }
        }
        runs
    }

    /// Boundaries a canonical tree holds, not counting the sentinel.
    fn expected_size(&self) -> usize {
        self.owners.windows(2).filter(|w| w[0] != w[1]).count()
    }
}

fn check_against_model(cache: &CacheTree, model: &Model) -> std::result::Result<(), TestCaseError> {
    let space = model.owners.len() as ObjectId - 1;
    for id in 0..=space {
        prop_assert_eq!(cache.get_primary_peer(id), model.owners[id as usize], "owner of {}", id);
    }
    prop_assert_eq!(cache.get_primary_peer(ID_MAX), INVALID_OWNER);
    prop_assert_eq!(cache.size(), model.expected_size());

    let entries = cache.entries();
    for pair in entries.windows(2) {
        prop_assert!(pair[0].owner != pair[1].owner, "adjacent duplicate owners: {:?}", entries);
    }
    let issues = cache.verify_integrity();
    prop_assert!(issues.is_empty(), "integrity issues: {:?}", issues);
    Ok(())
}

#[derive(Clone, Debug)]
enum Op {
    CacheRange(ObjectId, ObjectId, OwnerId),
    InvalidateChunk(ObjectId),
    InvalidateRange(ObjectId),
    InvalidatePeer(OwnerId),
    Metadata(ObjectId),
}

fn owner_strategy() -> impl Strategy<Value = OwnerId> + Clone {
    prop_oneof![
        9 => 0 as OwnerId..4,
        1 => Just(INVALID_OWNER),
    ]
}

fn range_strategy() -> impl Strategy<Value = (ObjectId, ObjectId)> {
    (0..SPACE, 0..12u64).prop_map(|(start, len)| (start, (start + len).min(SPACE - 1)))
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    let op = prop_oneof![
        50 => (range_strategy(), owner_strategy()).prop_map(|((s, e), o)| Op::CacheRange(s, e, o)),
        15 => (0..SPACE).prop_map(Op::InvalidateChunk),
        10 => (0..SPACE).prop_map(Op::InvalidateRange),
        5 => (0 as OwnerId..4).prop_map(Op::InvalidatePeer),
        20 => (0..SPACE).prop_map(Op::Metadata),
    ];
    prop::collection::vec(op, 0..=300)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence_with_model(order in 2u16..5, ops in ops_strategy()) {
        let cache = cache(order, u64::MAX);
        let mut model = Model::new(SPACE);

        for op in ops {
            match op {
                Op::CacheRange(start, end, owner) => {
                    prop_assert!(cache.cache_range(start, end, owner));
                    model.set(start, end, owner);
                }
                Op::InvalidateChunk(id) => {
                    cache.invalidate_chunk_id(id);
                    model.set(id, id, INVALID_OWNER);
                }
                Op::InvalidateRange(id) => {
                    let got = cache.invalidate_range(id);
                    let expected = model.invalidate_range(id);
                    prop_assert_eq!(got, expected);
                }
                Op::InvalidatePeer(owner) => {
                    let got = cache.invalidate_peer(owner);
                    let expected = model.invalidate_peer(owner);
                    prop_assert_eq!(got, expected);
                }
                Op::Metadata(id) => {
                    prop_assert_eq!(cache.get_metadata(id), model.metadata(id));
                }
            }
            prop_assert_eq!(cache.size(), model.expected_size());
        }

        check_against_model(&cache, &model)?;
    }

    #[test]
    fn prop_cache_range_is_idempotent(
        setup in prop::collection::vec((range_strategy(), owner_strategy()), 0..=40),
        (start, end) in range_strategy(),
        owner in owner_strategy(),
    ) {
        let cache = cache(2, u64::MAX);
        for ((s, e), o) in setup {
            cache.cache_range(s, e, o);
        }
        cache.cache_range(start, end, owner);
        let once = cache.entries();
        cache.cache_range(start, end, owner);
        prop_assert_eq!(cache.entries(), once);
    }

    #[test]
    fn prop_metadata_covers_id(
        setup in prop::collection::vec((range_strategy(), 0 as OwnerId..4), 1..=40),
        id in 0..SPACE,
    ) {
        let cache = cache(3, u64::MAX);
        for ((s, e), o) in setup {
            cache.cache_range(s, e, o);
        }
        match cache.get_metadata(id) {
            Some(range) => {
                prop_assert!(range.contains(id));
                prop_assert_eq!(range.owner, cache.get_primary_peer(id));
                prop_assert_eq!(cache.get_primary_peer(range.start), range.owner);
                prop_assert_eq!(cache.get_primary_peer(range.end), range.owner);
                if range.start > 0 {
                    prop_assert!(cache.get_primary_peer(range.start - 1) != range.owner);
                }
                prop_assert!(cache.get_primary_peer(range.end + 1) != range.owner);
            }
            None => prop_assert_eq!(cache.get_primary_peer(id), INVALID_OWNER),
        }
    }
}

#[test]
fn random_stress_against_model() {
    const STRESS_SPACE: ObjectId = 4_096;

    for (seed, order) in [(1u64, 2u16), (2, 3), (3, DEFAULT_ORDER)] {
        let mut rng = StdRng::seed_from_u64(seed);
        let cache = cache(order, u64::MAX);
        let mut model = Model::new(STRESS_SPACE);

        for step in 0..20_000 {
            let id = rng.gen_range(0..STRESS_SPACE);
            match rng.gen_range(0..10) {
                0..=5 => {
                    let end = (id + rng.gen_range(0..64)).min(STRESS_SPACE - 1);
                    let owner = rng.gen_range(0..8);
                    cache.cache_range(id, end, owner);
                    model.set(id, end, owner);
                }
                6 | 7 => {
                    cache.invalidate_chunk_id(id);
                    model.set(id, id, INVALID_OWNER);
                }
                8 => {
                    assert_eq!(cache.invalidate_range(id), model.invalidate_range(id));
                }
                _ => {
                    assert_eq!(cache.get_metadata(id), model.metadata(id));
                }
            }

            if step % 1_000 == 0 {
                let issues = cache.verify_integrity();
                assert!(issues.is_empty(), "seed {seed} step {step}: {issues:?}");
            }
        }

        for id in 0..=STRESS_SPACE {
            assert_eq!(cache.get_primary_peer(id), model.owners[id as usize], "seed {seed} id {id}");
        }
        assert_eq!(cache.size(), model.expected_size());
        assert!(cache.validate());
    }
}

#[test]
fn eviction_only_forgets() {
    const STRESS_SPACE: ObjectId = 2_048;

    let mut rng = StdRng::seed_from_u64(42);
    let cache = cache(3, 32);
    let mut model = Model::new(STRESS_SPACE);

    for round in 0..200 {
        for _ in 0..20 {
            let start = rng.gen_range(0..STRESS_SPACE);
            let end = (start + rng.gen_range(0..16)).min(STRESS_SPACE - 1);
            let owner = rng.gen_range(0..4);
            cache.cache_range(start, end, owner);
            model.set(start, end, owner);
        }

        cache.sweep();

        for id in 0..=STRESS_SPACE {
            let got = cache.get_primary_peer(id);
            let expected = model.owners[id as usize];
            assert!(
                got == expected || got == INVALID_OWNER,
                "round {round}: id {id} owned by {got}, expected {expected} or nothing"
            );
            model.owners[id as usize] = got;
        }
        assert!(cache.validate(), "round {round}");
    }

    // Over capacity, repeated sweeps keep shrinking the cache.
    let before = cache.size();
    if before > 32 {
        for _ in 0..1_000 {
            if cache.size() <= 32 {
                break;
            }
            cache.sweep();
        }
        assert!(cache.size() < before);
    }
}
