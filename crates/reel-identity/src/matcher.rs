//! Match new embeddings against a video's persisted identities.

use tracing::trace;

use reel_models::{Identity, IdentityId, ProjectionParams};

use crate::error::{IdentityError, IdentityResult};

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityMatch {
    pub identity_id: IdentityId,
    /// L2 distance in the reduced space
    pub distance: f64,
}

/// Nearest-identity lookup in the fitted space of one video.
#[derive(Debug, Clone)]
pub struct IdentityMatcher {
    projection: ProjectionParams,
    identities: Vec<Identity>,
    max_distance: Option<f64>,
}

impl IdentityMatcher {
    /// Fails when the projection is malformed or produces vectors of a
    /// different length than the stored identity embeddings.
    pub fn new(
        projection: ProjectionParams,
        identities: Vec<Identity>,
        max_distance: Option<f64>,
    ) -> IdentityResult<Self> {
        projection.validate()?;
        let expected = projection.output_dim();
        if let Some(bad) = identities.iter().find(|i| i.dimension() != expected) {
            return Err(IdentityError::IdentityDimension {
                identity: bad.id.to_string(),
                expected,
                found: bad.dimension(),
            });
        }
        Ok(Self {
            projection,
            identities,
            max_distance,
        })
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    /// Nearest identity to a raw embedding, or `None` if there are no
    /// identities or the nearest is beyond `max_distance`.
    ///
    /// Equal distances resolve to the lower label.
    pub fn match_embedding(&self, embedding: &[f32]) -> IdentityResult<Option<IdentityMatch>> {
        let projected = self.projection.project(embedding)?;

        let nearest = self
            .identities
            .iter()
            .map(|identity| {
                let d = identity
                    .embedding
                    .iter()
                    .zip(&projected)
                    .map(|(a, b)| (a - b).powi(2))
                    .sum::<f64>()
                    .sqrt();
                (identity, d)
            })
            .min_by(|(a, da), (b, db)| da.total_cmp(db).then(a.label.cmp(&b.label)));

        let Some((identity, distance)) = nearest else {
            return Ok(None);
        };
        if self.max_distance.is_some_and(|max| distance > max) {
            trace!(identity = %identity.id, distance, "Nearest identity too far");
            return Ok(None);
        }

        Ok(Some(IdentityMatch {
            identity_id: identity.id.clone(),
            distance,
        }))
    }
}
