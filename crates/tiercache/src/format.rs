//! Named formats: a disk budget plus an optional value transform.

use std::sync::Arc;

use crate::value::CacheValue;

/// The format every cache carries implicitly: identity transform,
/// unbounded disk budget.
pub const ORIGINAL_FORMAT: &str = "original";

type TransformFn<T> = Arc<dyn Fn(T) -> T + Send + Sync>;
type EncodeFn<T> = Arc<dyn Fn(&T) -> Option<Vec<u8>> + Send + Sync>;

/// A named configuration for one disk store of a cache.
///
/// A format bundles a disk capacity budget with an optional transform
/// that is applied to values before they are stored under this format,
/// an optional encode override, and an optional `prepare` hook that
/// runs on the transformed value right before it is delivered and
/// inserted into the memory tier (useful for values that benefit from
/// eager decoding, like image pixel buffers).
#[derive(Clone)]
pub struct Format<T> {
    name: String,
    disk_capacity: u64,
    transform: Option<TransformFn<T>>,
    encode_override: Option<EncodeFn<T>>,
    prepare: Option<TransformFn<T>>,
}

impl<T> std::fmt::Debug for Format<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Format")
            .field("name", &self.name)
            .field("disk_capacity", &self.disk_capacity)
            .field("is_identity", &self.is_identity())
            .finish()
    }
}

impl<T> Format<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn disk_capacity(&self) -> u64 {
        self.disk_capacity
    }

    /// Whether this format stores values unchanged.
    pub fn is_identity(&self) -> bool {
        self.transform.is_none()
    }
}

impl<T: CacheValue> Format<T> {
    /// Creates an identity format with an unbounded disk budget.
    pub fn new(name: impl Into<String>) -> Self {
        Format {
            name: name.into(),
            disk_capacity: u64::MAX,
            transform: None,
            encode_override: None,
            prepare: None,
        }
    }

    /// The implicit `"original"` format.
    pub(crate) fn original() -> Self {
        Self::new(ORIGINAL_FORMAT)
    }

    /// Caps the disk store of this format at `bytes`.
    pub fn with_disk_capacity(mut self, bytes: u64) -> Self {
        self.disk_capacity = bytes;
        self
    }

    /// Sets the transform applied to values stored under this format.
    pub fn with_transform(mut self, transform: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Overrides how values of this format are encoded for disk.
    pub fn with_encode(
        mut self,
        encode: impl Fn(&T) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        self.encode_override = Some(Arc::new(encode));
        self
    }

    /// Sets the post-transform hook run before delivery and memory
    /// insertion.
    pub fn with_prepare(mut self, prepare: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        self.prepare = Some(Arc::new(prepare));
        self
    }

    /// Runs the transform, off the calling task when one is present.
    pub async fn apply(&self, value: T) -> T
    where
        T: Send + 'static,
    {
        match self.transform.clone() {
            None => value,
            Some(transform) => tokio::task::spawn_blocking(move || transform(value))
                .await
                .expect("transform panicked"),
        }
    }

    /// Runs the post-transform hook, if any.
    pub fn prepare(&self, value: T) -> T {
        match &self.prepare {
            None => value,
            Some(prepare) => prepare(value),
        }
    }

    /// Encodes a value for the disk tier, preferring the override.
    pub fn encode(&self, value: &T) -> Option<Vec<u8>> {
        match &self.encode_override {
            Some(encode) => encode(value),
            None => value.encode(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_by_default() {
        let format = Format::<Vec<u8>>::new("thumb");
        assert!(format.is_identity());
        assert_eq!(format.disk_capacity(), u64::MAX);

        let format = format.with_transform(|mut v| {
            v.push(0);
            v
        });
        assert!(!format.is_identity());
        assert_eq!(
            format!("{format:?}"),
            "Format { name: \"thumb\", disk_capacity: 18446744073709551615, is_identity: false }"
        );
    }

    #[tokio::test]
    async fn test_apply_runs_transform() {
        let format = Format::<String>::new("upper").with_transform(|v| v.to_uppercase());
        assert_eq!(format.apply("hey".to_string()).await, "HEY");

        let identity = Format::<String>::new("plain");
        assert_eq!(identity.apply("hey".to_string()).await, "hey");
    }

    #[test]
    fn test_encode_override_wins() {
        let format = Format::<String>::new("fixed").with_encode(|_| Some(b"xxx".to_vec()));
        assert_eq!(format.encode(&"anything".to_string()), Some(b"xxx".to_vec()));

        let plain = Format::<String>::new("plain");
        assert_eq!(plain.encode(&"abc".to_string()), Some(b"abc".to_vec()));
    }

    #[test]
    fn test_prepare_hook() {
        let format = Format::<Vec<u8>>::new("eager").with_prepare(|mut v| {
            v.reverse();
            v
        });
        assert_eq!(format.prepare(vec![1, 2, 3]), vec![3, 2, 1]);
    }
}
