//! Latest-quote table keyed by instrument.
//!
//! Reference prices are kept beside the quotes: the stream overwrites a quote wholesale on
//! every message, but an OS/VS price loaded once must survive those overwrites.

use crate::types::{InstrumentId, Quote, ReferenceKind, positive};
use fnv::FnvHashMap;

#[derive(Debug, Clone, Default)]
pub struct QuoteStore {
    quotes: FnvHashMap<InstrumentId, Quote>,
    references: FnvHashMap<(InstrumentId, ReferenceKind), f64>,
}

impl QuoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the latest quote for an instrument (last write wins), returning the previous one.
    ///
    /// Reference prices carried by the quote are recorded if none is known yet; known
    /// reference prices are written into the stored quote so readers see a stable value.
    pub fn upsert(&mut self, mut quote: Quote) -> Option<Quote> {
        for kind in [ReferenceKind::SessionClose, ReferenceKind::EveningClose] {
            let key = (quote.instrument_id.clone(), kind);
            match self.references.get(&key) {
                Some(known) => *quote.reference_mut(kind) = Some(*known),
                None => {
                    if let Some(price) = positive(quote.reference(kind)) {
                        self.references.insert(key, price);
                    } else {
                        *quote.reference_mut(kind) = None;
                    }
                }
            }
        }

        self.quotes.insert(quote.instrument_id.clone(), quote)
    }

    /// Record a lazily loaded reference price.
    ///
    /// Returns `false` when the instrument is not tracked, the price is unusable, or a
    /// reference of that kind was already set this session.
    pub fn set_reference(&mut self, id: &InstrumentId, kind: ReferenceKind, price: f64) -> bool {
        let Some(price) = positive(Some(price)) else {
            return false;
        };
        let Some(quote) = self.quotes.get_mut(id) else {
            return false;
        };

        let key = (id.clone(), kind);
        if self.references.contains_key(&key) {
            return false;
        }

        self.references.insert(key, price);
        *quote.reference_mut(kind) = Some(price);
        true
    }

    pub fn reference(&self, id: &InstrumentId, kind: ReferenceKind) -> Option<f64> {
        self.references.get(&(id.clone(), kind)).copied()
    }

    pub fn get(&self, id: &InstrumentId) -> Option<&Quote> {
        self.quotes.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Quote> {
        self.quotes.values()
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    pub fn clear(&mut self) {
        self.quotes.clear();
        self.references.clear();
    }
}
