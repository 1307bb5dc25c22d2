//! Collection-flattening facets: change-translation adapters that present a
//! two-level grouped collection as a single flat index space for list
//! controls. Translation is synchronous and inline; cross-thread delivery
//! is the consumer's dispatcher's concern.

pub mod change;
pub mod facet;
pub mod flat;
pub mod source;

pub use change::{CollectionChange, VectorChange};
pub use facet::{CollectionChangedFacet, GroupChange, GroupVectorChange};
pub use flat::FlatCollectionChangedFacet;
pub use source::{ChangeHandler, ChangeSource, Subscription, VecChangeSource};
