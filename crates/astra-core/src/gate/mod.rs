//! Out-of-distribution gate.
//!
//! Embeds an image with the reference classifier, scores it against the
//! reference gallery and rejects anything below the threshold before the
//! pipeline commits to full inference.  Scores are cached per content
//! fingerprint until the next upload clears the cache.

pub mod cache;
pub mod gallery;

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::codec::{self, Image};
use crate::error::{CoreError, Result};
use crate::model::{ModelHandle, ModelKind, ModelRegistry, preprocess};

pub use cache::SimilarityCache;
pub use gallery::{GalleryError, ReferenceGallery, cosine_similarity};

/// Default similarity a query must reach to count as in-distribution.
pub const SIMILARITY_THRESHOLD: f32 = 0.80;

/// SHA-256 of an image's canonical PNG encoding.  A cache key only.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|b| write!(f, "{b:02x}"))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

pub fn fingerprint(image: &Image) -> Result<Fingerprint> {
    let png = codec::encode_png(image)?;
    let digest = Sha256::digest(&png);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(digest.as_slice());
    Ok(Fingerprint(bytes))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateVerdict {
    pub score: f32,
    pub in_distribution: bool,
    pub cache_hit: bool,
}

pub struct OodGate {
    cache: SimilarityCache,
    gallery: Option<Arc<ReferenceGallery>>,
    threshold: f32,
}

impl fmt::Debug for OodGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OodGate")
            .field("cached", &self.cache.len())
            .field("gallery_rows", &self.gallery.as_ref().map(|g| g.len()))
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl OodGate {
    /// A gate without a gallery fails every uncached check with
    /// [`CoreError::ModelUnavailable`].
    pub fn new(gallery: Option<Arc<ReferenceGallery>>, threshold: f32) -> Self {
        Self {
            cache: SimilarityCache::new(),
            gallery,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn has_gallery(&self) -> bool {
        self.gallery.is_some()
    }

    pub fn cache(&self) -> &SimilarityCache {
        &self.cache
    }

    /// Start a new upload session: forget every cached score.
    pub fn reset(&self) -> Result<()> {
        let removed = self.cache.clear()?;
        debug!(removed, "similarity cache cleared");
        Ok(())
    }

    /// Score `image` against the gallery using `reference_model`'s embedding.
    pub fn check_in_distribution(
        &self,
        image: &Image,
        registry: &ModelRegistry,
        reference_model: &str,
    ) -> Result<GateVerdict> {
        let key = fingerprint(image)?;
        if let Some(score) = self.cache.get(&key)? {
            info!(fingerprint = %key, score, "reusing cached similarity");
            return Ok(self.verdict(score, true));
        }

        let score = self.compute(image, registry, reference_model)?;
        info!(fingerprint = %key, score, reference = %reference_model, "computed similarity");
        self.cache.insert(key, score)?;
        Ok(self.verdict(score, false))
    }

    fn verdict(&self, score: f32, cache_hit: bool) -> GateVerdict {
        GateVerdict {
            score,
            in_distribution: score >= self.threshold,
            cache_hit,
        }
    }

    fn compute(&self, image: &Image, registry: &ModelRegistry, reference: &str) -> Result<f32> {
        let unavailable = |message: &str| CoreError::ModelUnavailable {
            name: reference.to_owned(),
            message: message.to_owned(),
        };

        let gallery = self
            .gallery
            .as_ref()
            .ok_or_else(|| unavailable("reference gallery not loaded"))?;

        let model = registry.get(reference)?;
        let (ModelKind::Classifier(spec), ModelHandle::Classifier(classifier)) =
            (&model.descriptor.kind, &model.handle)
        else {
            return Err(unavailable("reference model is not a classifier"));
        };
        let layer = spec
            .embedding_layer
            .as_deref()
            .ok_or_else(|| unavailable("reference model has no embedding layer"))?;

        let input = preprocess::prepare(image, spec.input_size, spec.preprocess);
        let embedding = classifier.embed(&input, layer)?;

        gallery.max_similarity(&embedding).ok_or_else(|| {
            CoreError::inference(
                reference,
                format!(
                    "embedding has {} values but the gallery expects {}",
                    embedding.len(),
                    gallery.dim()
                ),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::stub::{self, StubClassifier, StubLoader};

    fn image(seed: u8) -> Image {
        Image::from_rgb(RgbImage::from_pixel(16, 12, Rgb([seed, 10, 200])))
    }

    fn setup(embedding: Vec<f32>) -> (OodGate, ModelRegistry, Arc<StubClassifier>) {
        let classifier = Arc::new(StubClassifier::new(vec![0.1, 0.7, 0.1, 0.1]).with_embedding(embedding));
        let loader = StubLoader::new().with_classifier("vgg", Arc::clone(&classifier));
        let registry = ModelRegistry::new(Arc::new(stub::catalog()), Arc::new(loader));
        let gallery = ReferenceGallery::from_rows(vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]]).unwrap();
        (OodGate::new(Some(Arc::new(gallery)), SIMILARITY_THRESHOLD), registry, classifier)
    }

    #[test]
    fn fingerprint_is_content_based() {
        assert_eq!(fingerprint(&image(1)).unwrap(), fingerprint(&image(1)).unwrap());
        assert_ne!(fingerprint(&image(1)).unwrap(), fingerprint(&image(2)).unwrap());
        assert_eq!(fingerprint(&image(1)).unwrap().to_string().len(), 64);
    }

    #[test]
    fn second_lookup_hits_cache_without_inference() {
        let (gate, registry, classifier) = setup(vec![1.0, 0.1, 0.0]);

        let first = gate.check_in_distribution(&image(3), &registry, "vgg").unwrap();
        let second = gate.check_in_distribution(&image(3), &registry, "vgg").unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.score, second.score);
        assert!(first.in_distribution);
        assert_eq!(classifier.embed_calls(), 1);
    }

    #[test]
    fn reset_forces_recomputation() {
        let (gate, registry, classifier) = setup(vec![1.0, 0.0, 0.0]);

        gate.check_in_distribution(&image(4), &registry, "vgg").unwrap();
        gate.reset().unwrap();
        assert!(gate.cache().is_empty());
        let again = gate.check_in_distribution(&image(4), &registry, "vgg").unwrap();

        assert!(!again.cache_hit);
        assert_eq!(classifier.embed_calls(), 2);
    }

    #[test]
    fn dissimilar_embedding_is_out_of_distribution() {
        let (gate, registry, _) = setup(vec![0.0, 0.0, 1.0]);
        let verdict = gate.check_in_distribution(&image(5), &registry, "vgg").unwrap();
        assert!(!verdict.in_distribution);
        assert!(verdict.score < SIMILARITY_THRESHOLD);
    }

    #[test]
    fn threshold_is_inclusive() {
        let (gate, _, _) = setup(vec![]);
        assert!(gate.verdict(SIMILARITY_THRESHOLD, false).in_distribution);
    }

    #[test]
    fn missing_gallery_is_unavailable() {
        let (_, registry, classifier) = setup(vec![1.0, 0.0, 0.0]);
        let gate = OodGate::new(None, SIMILARITY_THRESHOLD);
        let err = gate.check_in_distribution(&image(6), &registry, "vgg").unwrap_err();
        assert!(matches!(err, CoreError::ModelUnavailable { .. }));
        assert!(gate.cache().is_empty());
        assert_eq!(classifier.embed_calls(), 0);
    }

    #[test]
    fn dimension_mismatch_is_an_inference_error() {
        let (gate, registry, _) = setup(vec![1.0, 0.0]);
        let err = gate.check_in_distribution(&image(7), &registry, "vgg").unwrap_err();
        assert!(matches!(err, CoreError::Inference { .. }));
        assert!(gate.cache().is_empty());
    }
}
