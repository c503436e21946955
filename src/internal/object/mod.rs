//! Object model for the store-level plumbing underneath review metadata.
//!
//! The review layer itself never touches these codecs: it speaks to a
//! [`Repo`](crate::repo::Repo) in terms of hashes and refs. They exist for
//! the two places this crate has to produce byte-exact git objects of its
//! own: the in-memory backend, which must hash and store commits, trees,
//! and blobs exactly the way git would so ids agree with real
//! repositories, and the fork registry, which encodes forks as trees of
//! hash-named value blobs.
pub mod blob;
pub mod commit;
pub mod signature;
pub mod tree;
pub mod types;

use crate::{errors::ReviewError, hash::ObjectHash, internal::object::types::ObjectType};

/// Serialization contract shared by the object codecs (blob, tree, commit).
///
/// `serialize` produces the payload git would store for the object, before
/// the `<type> <len>\0` hashing envelope; `parse` inverts it given the id
/// the payload was stored under. An id computed by [`GitObject::computed_id`]
/// on one of these values therefore matches what `git hash-object` would
/// print for the same bytes, which is the property the in-memory backend
/// relies on.
pub trait GitObject: Sized {
    /// Decode a stored payload. The id is carried, not recomputed; callers
    /// that fetched the payload by id already know it.
    fn parse(data: &[u8], id: ObjectHash) -> Result<Self, ReviewError>;

    /// Which of the store's object kinds this codec produces.
    fn object_type(&self) -> ObjectType;

    /// Encode to the payload git stores for this object.
    fn serialize(&self) -> Result<Vec<u8>, ReviewError>;

    /// The id the serialized payload would be stored under.
    fn computed_id(&self) -> Result<ObjectHash, ReviewError> {
        Ok(ObjectHash::for_object(self.object_type(), &self.serialize()?))
    }
}
