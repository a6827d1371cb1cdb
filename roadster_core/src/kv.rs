use trait_set::trait_set;

/// Key type of the index. The structure assumes a signed fixed-width integer;
/// the slot arrays reserve [`END_SENTINEL`] for trailing gaps, so it can never
/// be stored as a real key.
pub type Key = i64;

pub const MIN_KEY: Key = Key::MIN;
pub const MAX_KEY: Key = Key::MAX;

/// Placed in every key slot to the right of the last filled position.
pub const END_SENTINEL: Key = MAX_KEY;

// Until `trait_alias` is stabilized, we have to use a macro
trait_set! {
    /// General payload type, an opaque fixed-width value
    pub trait Payload = Send + Sync + Default + Copy + 'static;
}
