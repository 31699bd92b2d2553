//! Instrument classification and base-symbol grouping.
//!
//! Derivative metadata is authoritative: an instrument listed there is a derivative and
//! groups under its underlying symbol. Ticker suffixes are only a fallback because month
//! codes collide with ordinary equity tickers.
//!
//! Near/far assignment follows a quarter-adjacency rule: near is the soonest expiry, far
//! is the first later contract expiring exactly one quarter after near. It is not simply
//! the second-soonest expiry.

use crate::{
    metrics::lot_size_or_default,
    store::QuoteStore,
    types::{DerivativeMetadata, InstrumentId, Quote},
};
use chrono::{Datelike, NaiveDate};
use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Futures month codes, January through December.
pub const MONTH_CODES: [char; 12] = ['F', 'G', 'H', 'J', 'K', 'M', 'N', 'Q', 'U', 'V', 'X', 'Z'];

/// Role of an instrument within its base-symbol group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Equity,
    NearDerivative,
    FarDerivative,
    /// A derivative that is neither the near nor the far contract of its base symbol.
    OtherDerivative,
    Index,
}

/// Role-free instrument kind, decided per instrument without looking at its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    Equity,
    Derivative,
    Index,
}

/// Calendar quarter of an expiration date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExpiryQuarter {
    pub year: i32,
    pub quarter: u32,
}

impl ExpiryQuarter {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            quarter: (date.month() - 1) / 3 + 1,
        }
    }

    /// The quarter immediately following this one (Q4 rolls into Q1 of the next year).
    pub fn next(self) -> Self {
        if self.quarter >= 4 {
            Self {
                year: self.year + 1,
                quarter: 1,
            }
        } else {
            Self {
                year: self.year,
                quarter: self.quarter + 1,
            }
        }
    }
}

impl std::fmt::Display for ExpiryQuarter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}Q{}", self.year, self.quarter)
    }
}

/// Instruments sharing one base symbol. Members are referenced by id into the quote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentGroup {
    pub base_symbol: SmolStr,
    pub equity: Option<InstrumentId>,
    pub near_derivative: Option<InstrumentId>,
    pub far_derivative: Option<InstrumentId>,
}

impl InstrumentGroup {
    fn new(base_symbol: SmolStr) -> Self {
        Self {
            base_symbol,
            equity: None,
            near_derivative: None,
            far_derivative: None,
        }
    }

    pub fn role_of(&self, id: &InstrumentId) -> Option<Role> {
        if self.equity.as_ref() == Some(id) {
            Some(Role::Equity)
        } else if self.near_derivative.as_ref() == Some(id) {
            Some(Role::NearDerivative)
        } else if self.far_derivative.as_ref() == Some(id) {
            Some(Role::FarDerivative)
        } else {
            None
        }
    }
}

/// Length of a recognised expiry suffix on a ticker: 2 for month code + year digit
/// (`Z5`), 1 for a bare month code (`Z`).
pub fn expiry_suffix_len(symbol: &str) -> Option<usize> {
    let chars = symbol.trim().chars().collect::<Vec<_>>();
    let is_month = |c: char| MONTH_CODES.contains(&c.to_ascii_uppercase());

    match chars.as_slice() {
        [.., month, year] if chars.len() > 2 && year.is_ascii_digit() && is_month(*month) => {
            Some(2)
        }
        [.., month] if chars.len() > 1 && is_month(*month) => Some(1),
        _ => None,
    }
}

/// Pick near and far contracts from `(id, expiry)` candidates of one base symbol.
pub fn assign_near_far(
    candidates: &[(InstrumentId, NaiveDate)],
) -> (Option<InstrumentId>, Option<InstrumentId>) {
    let sorted = candidates
        .iter()
        .sorted_by(|(a_id, a_date), (b_id, b_date)| a_date.cmp(b_date).then(a_id.cmp(b_id)))
        .collect::<Vec<_>>();

    let Some((near_id, near_date)) = sorted.first() else {
        return (None, None);
    };

    let wanted = ExpiryQuarter::from_date(*near_date).next();
    let far = sorted
        .iter()
        .skip(1)
        .find(|(_, date)| ExpiryQuarter::from_date(*date) == wanted)
        .map(|(id, _)| id.clone());

    (Some(near_id.clone()), far)
}

#[derive(Debug, Clone, Default)]
pub struct InstrumentClassifier {
    derivatives: FnvHashMap<InstrumentId, DerivativeMetadata>,
    indices: FnvHashSet<InstrumentId>,
}

impl InstrumentClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the derivative metadata table wholesale.
    pub fn load_derivatives<I>(&mut self, metadata: I)
    where
        I: IntoIterator<Item = DerivativeMetadata>,
    {
        self.derivatives = metadata
            .into_iter()
            .map(|meta| (meta.instrument_id.clone(), meta))
            .collect();
    }

    /// Replace the set of tracked index instruments.
    pub fn track_indices<I>(&mut self, indices: I)
    where
        I: IntoIterator<Item = InstrumentId>,
    {
        self.indices = indices.into_iter().collect();
    }

    pub fn metadata(&self, id: &InstrumentId) -> Option<&DerivativeMetadata> {
        self.derivatives.get(id)
    }

    pub fn derivative_count(&self) -> usize {
        self.derivatives.len()
    }

    pub fn is_index(&self, id: &InstrumentId) -> bool {
        self.indices.contains(id)
    }

    pub fn expiration(&self, id: &InstrumentId) -> Option<NaiveDate> {
        self.metadata(id).and_then(|meta| meta.expiration_date)
    }

    /// Contract multiplier, defaulting when metadata is missing or unusable.
    pub fn lot_size(&self, id: &InstrumentId) -> f64 {
        lot_size_or_default(self.metadata(id).and_then(|meta| meta.contract_multiplier))
    }

    pub fn kind(&self, id: &InstrumentId, symbol: &str) -> InstrumentKind {
        if self.is_index(id) {
            InstrumentKind::Index
        } else if self.derivatives.contains_key(id) || expiry_suffix_len(symbol).is_some() {
            InstrumentKind::Derivative
        } else {
            InstrumentKind::Equity
        }
    }

    pub fn base_symbol_of(&self, id: &InstrumentId, symbol: &str) -> SmolStr {
        if let Some(underlying) = self
            .metadata(id)
            .and_then(|meta| meta.underlying_symbol.as_ref())
        {
            return SmolStr::new(underlying.trim().to_uppercase());
        }

        let symbol = symbol.trim();
        let stripped = match expiry_suffix_len(symbol) {
            Some(len) => {
                let keep = symbol.chars().count() - len;
                symbol.chars().take(keep).collect::<String>()
            }
            None => symbol.to_string(),
        };
        SmolStr::new(stripped.to_uppercase())
    }

    /// Role of one instrument given the current quote table.
    pub fn classify(&self, id: &InstrumentId, symbol: &str, store: &QuoteStore) -> Role {
        match self.kind(id, symbol) {
            InstrumentKind::Index => Role::Index,
            InstrumentKind::Equity => Role::Equity,
            InstrumentKind::Derivative => {
                let base = self.base_symbol_of(id, symbol);
                let candidates = self.expiry_candidates(&base, store.iter());
                match assign_near_far(&candidates) {
                    (Some(near), _) if &near == id => Role::NearDerivative,
                    (_, Some(far)) if &far == id => Role::FarDerivative,
                    _ => Role::OtherDerivative,
                }
            }
        }
    }

    /// Group every quoted instrument by base symbol, ordered by base symbol.
    ///
    /// The result depends only on the set of quotes, not on the order they arrived in.
    pub fn group(&self, store: &QuoteStore) -> Vec<InstrumentGroup> {
        let mut groups = BTreeMap::<SmolStr, InstrumentGroup>::new();
        let mut expiries = BTreeMap::<SmolStr, Vec<(InstrumentId, NaiveDate)>>::new();

        for quote in store.iter() {
            let id = &quote.instrument_id;
            let base = self.base_symbol_of(id, &quote.symbol);
            if base.is_empty() {
                continue;
            }
            let group = groups
                .entry(base.clone())
                .or_insert_with(|| InstrumentGroup::new(base.clone()));

            match self.kind(id, &quote.symbol) {
                InstrumentKind::Equity => {
                    // One equity per base symbol; lowest id wins for determinism
                    if group.equity.as_ref().is_none_or(|current| id < current) {
                        group.equity = Some(id.clone());
                    }
                }
                InstrumentKind::Derivative => {
                    if let Some(expiry) = self.expiration(id) {
                        expiries.entry(base).or_default().push((id.clone(), expiry));
                    }
                }
                InstrumentKind::Index => {}
            }
        }

        for (base, candidates) in expiries {
            if let Some(group) = groups.get_mut(&base) {
                let (near, far) = assign_near_far(&candidates);
                group.near_derivative = near;
                group.far_derivative = far;
            }
        }

        groups.into_values().collect()
    }

    fn expiry_candidates<'a>(
        &self,
        base: &str,
        quotes: impl Iterator<Item = &'a Quote>,
    ) -> Vec<(InstrumentId, NaiveDate)> {
        quotes
            .filter(|quote| {
                self.kind(&quote.instrument_id, &quote.symbol) == InstrumentKind::Derivative
                    && self.base_symbol_of(&quote.instrument_id, &quote.symbol) == base
            })
            .filter_map(|quote| {
                self.expiration(&quote.instrument_id)
                    .map(|expiry| (quote.instrument_id.clone(), expiry))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn future(id: &str, ticker: &str, underlying: &str, expiry: NaiveDate) -> DerivativeMetadata {
        DerivativeMetadata::new(id, ticker)
            .with_underlying(underlying)
            .with_expiration(expiry)
    }

    #[test]
    fn test_expiry_suffix_len() {
        struct TestCase {
            input: &'static str,
            expected: Option<usize>,
        }

        let tests = vec![
            TestCase {
                // TC0: month code + year digit
                input: "ABCZ5",
                expected: Some(2),
            },
            TestCase {
                // TC1: lower-case still recognised
                input: "SiH6",
                expected: Some(2),
            },
            TestCase {
                // TC2: bare month code
                input: "ABCZ",
                expected: Some(1),
            },
            TestCase {
                // TC3: plain equity ticker
                input: "SBER",
                expected: None,
            },
            TestCase {
                // TC4: digit without month code
                input: "ABC5",
                expected: None,
            },
            TestCase {
                // TC5: a lone month letter is not a suffix
                input: "Z",
                expected: None,
            },
            TestCase {
                // TC6: two characters only: single-letter suffix on one-letter root
                input: "Z5",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(expiry_suffix_len(test.input), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_expiry_quarter_next() {
        let q2 = ExpiryQuarter::from_date(date(2025, 5, 15));
        assert_eq!(q2, ExpiryQuarter { year: 2025, quarter: 2 });
        assert_eq!(q2.next(), ExpiryQuarter { year: 2025, quarter: 3 });

        let q4 = ExpiryQuarter::from_date(date(2025, 12, 19));
        assert_eq!(q4.next(), ExpiryQuarter { year: 2026, quarter: 1 });
        assert_eq!(q4.to_string(), "2025Q4");
    }

    #[test]
    fn test_assign_near_far_adjacent_quarter() {
        // Q1, Q2, Q4 of the same year: far is Q2
        let candidates = vec![
            (InstrumentId::new("Q4"), date(2026, 12, 18)),
            (InstrumentId::new("Q1"), date(2026, 3, 20)),
            (InstrumentId::new("Q2"), date(2026, 6, 19)),
        ];
        let (near, far) = assign_near_far(&candidates);
        assert_eq!(near, Some(InstrumentId::new("Q1")));
        assert_eq!(far, Some(InstrumentId::new("Q2")));
    }

    #[test]
    fn test_assign_near_far_skips_non_adjacent_second_nearest() {
        struct TestCase {
            candidates: Vec<(InstrumentId, NaiveDate)>,
            expected_near: Option<&'static str>,
            expected_far: Option<&'static str>,
        }

        let tests = vec![
            TestCase {
                // TC0: Q1, Q3, Q4 - second nearest is two quarters out, no adjacent contract
                candidates: vec![
                    (InstrumentId::new("Q1"), date(2026, 3, 20)),
                    (InstrumentId::new("Q3"), date(2026, 9, 18)),
                    (InstrumentId::new("Q4"), date(2026, 12, 18)),
                ],
                expected_near: Some("Q1"),
                expected_far: None,
            },
            TestCase {
                // TC1: monthly then quarterly - second nearest is same quarter, far found later
                candidates: vec![
                    (InstrumentId::new("JAN"), date(2026, 1, 16)),
                    (InstrumentId::new("MAR"), date(2026, 3, 20)),
                    (InstrumentId::new("JUN"), date(2026, 6, 19)),
                ],
                expected_near: Some("JAN"),
                expected_far: Some("JUN"),
            },
            TestCase {
                // TC2: Q4 rolls into Q1 of the next year
                candidates: vec![
                    (InstrumentId::new("DEC"), date(2025, 12, 19)),
                    (InstrumentId::new("MAR"), date(2026, 3, 20)),
                ],
                expected_near: Some("DEC"),
                expected_far: Some("MAR"),
            },
            TestCase {
                // TC3: Q4 -> Q1 two years later is not adjacent
                candidates: vec![
                    (InstrumentId::new("DEC"), date(2025, 12, 19)),
                    (InstrumentId::new("MAR27"), date(2027, 3, 19)),
                ],
                expected_near: Some("DEC"),
                expected_far: None,
            },
            TestCase {
                // TC4: single contract
                candidates: vec![(InstrumentId::new("ONLY"), date(2026, 3, 20))],
                expected_near: Some("ONLY"),
                expected_far: None,
            },
            TestCase {
                // TC5: nothing
                candidates: vec![],
                expected_near: None,
                expected_far: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let (near, far) = assign_near_far(&test.candidates);
            assert_eq!(
                near,
                test.expected_near.map(InstrumentId::new),
                "TC{} near failed",
                index
            );
            assert_eq!(
                far,
                test.expected_far.map(InstrumentId::new),
                "TC{} far failed",
                index
            );
        }
    }

    #[test]
    fn test_metadata_takes_priority_over_suffix() {
        let mut classifier = InstrumentClassifier::new();
        classifier.load_derivatives([future("FUT1", "SRZ5", "sber", date(2025, 12, 19))]);

        // Metadata underlying wins over suffix stripping ("SR")
        assert_eq!(classifier.base_symbol_of(&"FUT1".into(), "SRZ5"), "SBER");
        assert_eq!(
            classifier.kind(&"FUT1".into(), "SRZ5"),
            InstrumentKind::Derivative
        );

        // Listed in metadata even though the ticker carries no month code
        classifier.load_derivatives([future("FUT2", "IMOEXFUT1", "IMOEX", date(2025, 12, 19))]);
        assert_eq!(
            classifier.kind(&"FUT2".into(), "IMOEXFUT1"),
            InstrumentKind::Derivative
        );
        assert_eq!(classifier.base_symbol_of(&"FUT2".into(), "IMOEXFUT1"), "IMOEX");
        // The same ticker without metadata falls back to the suffix rules
        assert_eq!(
            classifier.kind(&"OTHER".into(), "IMOEXFUT1"),
            InstrumentKind::Equity
        );
        // Reload replaced the table wholesale
        assert!(classifier.metadata(&"FUT1".into()).is_none());
    }

    #[test]
    fn test_symbol_fallback() {
        let mut classifier = InstrumentClassifier::new();
        classifier.track_indices([InstrumentId::new("IDX")]);

        assert_eq!(classifier.kind(&"X".into(), "SBER"), InstrumentKind::Equity);
        assert_eq!(classifier.base_symbol_of(&"X".into(), "sber"), "SBER");

        assert_eq!(classifier.kind(&"Y".into(), "GAZPH6"), InstrumentKind::Derivative);
        assert_eq!(classifier.base_symbol_of(&"Y".into(), "GAZPH6"), "GAZP");
        assert_eq!(classifier.base_symbol_of(&"Z".into(), "gazpm"), "GAZP");

        assert_eq!(classifier.kind(&"IDX".into(), "IMOEX2"), InstrumentKind::Index);
    }

    #[test]
    fn test_lot_size_defaults() {
        let mut classifier = InstrumentClassifier::new();
        classifier.load_derivatives([
            DerivativeMetadata::new("A", "AZ5").with_multiplier(10.0),
            DerivativeMetadata::new("B", "BZ5").with_multiplier(0.0),
            DerivativeMetadata::new("C", "CZ5").with_multiplier(f64::INFINITY),
            DerivativeMetadata::new("D", "DZ5"),
        ]);

        assert_eq!(classifier.lot_size(&"A".into()), 10.0);
        assert_eq!(classifier.lot_size(&"B".into()), 100.0);
        assert_eq!(classifier.lot_size(&"C".into()), 100.0);
        assert_eq!(classifier.lot_size(&"D".into()), 100.0);
        assert_eq!(classifier.lot_size(&"unknown".into()), 100.0);
    }

    #[test]
    fn test_group_independent_of_arrival_order() {
        let mut classifier = InstrumentClassifier::new();
        classifier.load_derivatives([
            future("NEAR", "ABCZ5", "ABC", date(2025, 12, 19)),
            future("FAR", "ABCH6", "ABC", date(2026, 3, 20)),
        ]);

        let quotes = vec![
            Quote::new("EQ", "ABC").with_price(100.0),
            Quote::new("NEAR", "ABCZ5").with_price(10_100.0),
            Quote::new("FAR", "ABCH6").with_price(10_300.0),
            Quote::new("OTHER", "SBER").with_price(300.0),
        ];

        let expected = vec![
            InstrumentGroup {
                base_symbol: SmolStr::new("ABC"),
                equity: Some(InstrumentId::new("EQ")),
                near_derivative: Some(InstrumentId::new("NEAR")),
                far_derivative: Some(InstrumentId::new("FAR")),
            },
            InstrumentGroup {
                base_symbol: SmolStr::new("SBER"),
                equity: Some(InstrumentId::new("OTHER")),
                near_derivative: None,
                far_derivative: None,
            },
        ];

        for permutation in quotes.iter().permutations(quotes.len()) {
            let mut store = QuoteStore::new();
            for quote in permutation {
                store.upsert(quote.clone());
            }
            assert_eq!(classifier.group(&store), expected);
        }
    }

    #[test]
    fn test_classify_roles() {
        let mut classifier = InstrumentClassifier::new();
        classifier.load_derivatives([
            future("Q1", "ABCH6", "ABC", date(2026, 3, 20)),
            future("Q2", "ABCM6", "ABC", date(2026, 6, 19)),
            future("Q4", "ABCZ6", "ABC", date(2026, 12, 18)),
        ]);
        classifier.track_indices([InstrumentId::new("IDX")]);

        let mut store = QuoteStore::new();
        for (id, symbol) in [
            ("Q4", "ABCZ6"),
            ("Q2", "ABCM6"),
            ("Q1", "ABCH6"),
            ("EQ", "ABC"),
            ("IDX", "IMOEX2"),
        ] {
            store.upsert(Quote::new(id, symbol).with_price(1.0));
        }

        assert_eq!(classifier.classify(&"Q1".into(), "ABCH6", &store), Role::NearDerivative);
        assert_eq!(classifier.classify(&"Q2".into(), "ABCM6", &store), Role::FarDerivative);
        assert_eq!(classifier.classify(&"Q4".into(), "ABCZ6", &store), Role::OtherDerivative);
        assert_eq!(classifier.classify(&"EQ".into(), "ABC", &store), Role::Equity);
        assert_eq!(classifier.classify(&"IDX".into(), "IMOEX2", &store), Role::Index);

        let groups = classifier.group(&store);
        let abc = groups.iter().find(|group| group.base_symbol == "ABC").unwrap();
        assert_eq!(abc.role_of(&"Q2".into()), Some(Role::FarDerivative));
        assert_eq!(abc.role_of(&"Q4".into()), None);
    }

    #[test]
    fn test_heuristic_derivative_without_expiry_is_not_matched() {
        let classifier = InstrumentClassifier::new();
        let mut store = QuoteStore::new();
        store.upsert(Quote::new("EQ", "ABC").with_price(100.0));
        store.upsert(Quote::new("FUT", "ABCZ5").with_price(10_100.0));

        let groups = classifier.group(&store);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].near_derivative, None);
        assert_eq!(
            classifier.classify(&"FUT".into(), "ABCZ5", &store),
            Role::OtherDerivative
        );
    }
}
