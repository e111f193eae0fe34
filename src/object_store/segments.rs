//! Segment planning for large artifacts

use crate::object_store::limits::StoreLimits;
use serde::Serialize;

/// How an artifact of a given size is laid out in the object store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StagingSegmentPlan {
    pub object_size: u64,
    /// Size of every segment but the last; equals `object_size` for whole uploads
    pub segment_size: u64,
    /// Zero for whole-object uploads
    pub segment_count: u64,
    pub static_large_object: bool,
}

/// One byte range of the artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub index: u64,
    pub offset: u64,
    pub length: u64,
}

impl StagingSegmentPlan {
    /// Plan the upload of `size` bytes.
    ///
    /// The artifact goes up whole when it is below the store's minimum
    /// segment size. Otherwise segments are as large as allowed: the
    /// store limit, or `segment_size_override` if that is smaller. An
    /// override is never taken below the store's minimum segment size.
    pub fn plan(size: u64, limits: &StoreLimits, segment_size_override: Option<u64>) -> Self {
        if size == 0 || (size < limits.min_segment_size && size <= limits.max_file_size) {
            return Self {
                object_size: size,
                segment_size: size,
                segment_count: 0,
                static_large_object: false,
            };
        }

        let limit = limits.max_file_size.max(1);
        let segment_size = segment_size_override
            .filter(|&s| s > 0)
            .map_or(limit, |s| s.max(limits.min_segment_size).min(limit));

        Self {
            object_size: size,
            segment_size,
            segment_count: size.div_ceil(segment_size),
            static_large_object: limits.static_large_objects,
        }
    }

    pub fn is_segmented(&self) -> bool {
        self.segment_count > 0
    }

    pub fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        (0..self.segment_count).map(move |index| {
            let offset = index * self.segment_size;
            Segment {
                index,
                offset,
                length: self.segment_size.min(self.object_size - offset),
            }
        })
    }

    /// Common name prefix of all segments of `object`
    pub fn segment_prefix(&self, object: &str) -> String {
        format!(
            "{}/slo/{}/{}/",
            object, self.object_size, self.segment_size
        )
    }

    pub fn segment_name(&self, object: &str, segment: &Segment) -> String {
        format!("{}{:08}", self.segment_prefix(object), segment.index)
    }
}

/// Container holding the segments of objects stored in `container`
pub fn segments_container(container: &str) -> String {
    format!("{}_segments", container)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max: u64, min: u64) -> StoreLimits {
        StoreLimits {
            max_file_size: max,
            min_segment_size: min,
            static_large_objects: true,
        }
    }

    #[test]
    fn test_small_artifact_is_whole() {
        let plan = StagingSegmentPlan::plan(1, &limits(1000, 500), None);

        assert!(!plan.is_segmented());
        assert_eq!(plan.segments().count(), 0);
        assert!(!plan.static_large_object);
    }

    #[test]
    fn test_large_artifact_is_segmented() {
        let plan = StagingSegmentPlan::plan(2500, &limits(1000, 500), None);

        assert_eq!(plan.segment_size, 1000);
        assert_eq!(plan.segment_count, 3);

        let lengths: Vec<_> = plan.segments().map(|s| s.length).collect();
        assert_eq!(lengths, vec![1000, 1000, 500]);
    }

    #[test]
    fn test_override_never_exceeds_limit() {
        let plan = StagingSegmentPlan::plan(2500, &limits(1000, 500), Some(4000));
        assert_eq!(plan.segment_size, 1000);

        let plan = StagingSegmentPlan::plan(2500, &limits(1000, 500), Some(600));
        assert_eq!(plan.segment_size, 600);
        assert_eq!(plan.segment_count, 5);
    }

    #[test]
    fn test_override_is_raised_to_minimum_segment_size() {
        let plan = StagingSegmentPlan::plan(2500, &limits(1000, 500), Some(100));
        assert_eq!(plan.segment_size, 500);
        assert_eq!(plan.segment_count, 5);

        // every segment but the last respects the store minimum
        let lengths: Vec<_> = plan.segments().map(|s| s.length).collect();
        assert!(lengths[..lengths.len() - 1].iter().all(|&l| l >= 500));
    }

    #[test]
    fn test_empty_artifact_is_whole() {
        let plan = StagingSegmentPlan::plan(0, &limits(1000, 0), None);
        assert!(!plan.is_segmented());
    }

    #[test]
    fn test_segment_names() {
        let plan = StagingSegmentPlan::plan(2500, &limits(1000, 500), None);
        let last = plan.segments().last().unwrap();

        assert_eq!(plan.segment_name("disk", &last), "disk/slo/2500/1000/00000002");
        assert_eq!(segments_container("images"), "images_segments");
    }

    #[test]
    fn test_plan_properties() {
        let stores = [
            limits(1000, 500),
            limits(1000, 1),
            limits(7, 3),
            limits(1 << 20, 1 << 10),
        ];
        let sizes = [1u64, 2, 3, 499, 500, 501, 999, 1000, 1001, 2047, 1 << 21, (1 << 21) + 1];

        for store in &stores {
            for &size in &sizes {
                let plan = StagingSegmentPlan::plan(size, store, None);

                assert_eq!(
                    !plan.is_segmented(),
                    size < store.min_segment_size,
                    "size {} store {:?}",
                    size,
                    store
                );
                if plan.is_segmented() {
                    assert!(plan.segment_size <= store.max_file_size);
                    assert_eq!(plan.segment_count, size.div_ceil(plan.segment_size));

                    let segments: Vec<_> = plan.segments().collect();
                    assert_eq!(segments.iter().map(|s| s.length).sum::<u64>(), size);
                    assert!(segments.iter().all(|s| s.length > 0));
                }
            }
        }
    }
}
