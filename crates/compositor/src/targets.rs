//! Reference-counted offscreen render targets.
//!
//! Pool targets are all the size of the render resolution, which is the
//! output size times the anti-alias level. Anti-alias rendering additionally
//! needs a ladder of permanently allocated targets, each half the size of the
//! previous one, that the final image is downsampled through.
use std::fmt;

use crate::error::{CompositorError, Result};
use crate::gpu::{FramebufferHandle, GpuContext, TextureHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub usize);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Marks ladder targets, which are never recycled.
const PERMANENT: i32 = -1;

#[derive(Debug, Clone)]
pub struct RenderTarget {
    pub framebuffer: FramebufferHandle,
    pub texture: TextureHandle,
    pub width: u32,
    pub height: u32,
    use_count: i32,
}

impl RenderTarget {
    pub fn use_count(&self) -> i32 {
        self.use_count
    }

    pub fn is_permanent(&self) -> bool {
        self.use_count == PERMANENT
    }
}

/// Largest power of two not above `requested` whose render size fits.
pub fn achievable_anti_alias(width: u32, height: u32, requested: u32, max_dimension: u32) -> u32 {
    let mut level = 1u32;
    while level.saturating_mul(2) <= requested.max(1) {
        level *= 2;
    }
    let longest = width.max(height).max(1) as u64;
    while level > 1 && longest * level as u64 > max_dimension as u64 {
        level /= 2;
    }
    level
}

#[derive(Debug)]
pub struct RenderTargets {
    targets: Vec<RenderTarget>,
    unused: Vec<TargetId>,
    ladder: Vec<TargetId>,
    width: u32,
    height: u32,
    anti_alias: u32,
    deleted: bool,
}

impl RenderTargets {
    /// Allocates the ladder for an output of `width`×`height`. Pool targets
    /// are created lazily by [`request`](Self::request).
    pub fn create(gpu: &mut dyn GpuContext, width: u32, height: u32, anti_alias: u32) -> Result<Self> {
        let level = achievable_anti_alias(width, height, anti_alias, gpu.max_texture_dimension());
        if level < anti_alias {
            tracing::warn!(
                requested = anti_alias,
                level,
                width,
                height,
                "anti-alias level reduced to fit the maximum texture size"
            );
        }
        let mut pool = Self {
            targets: Vec::new(),
            unused: Vec::new(),
            ladder: Vec::new(),
            width: width.max(1),
            height: height.max(1),
            anti_alias: level,
            deleted: false,
        };

        let mut factor = level / 2;
        while factor >= 2 {
            let (framebuffer, texture) = gpu.create_framebuffer(pool.width * factor, pool.height * factor)?;
            let id = TargetId(pool.targets.len());
            pool.targets.push(RenderTarget {
                framebuffer,
                texture,
                width: pool.width * factor,
                height: pool.height * factor,
                use_count: PERMANENT,
            });
            pool.ladder.push(id);
            factor /= 2;
        }
        tracing::debug!(width, height, anti_alias = level, ladder = pool.ladder.len(), "created render targets");
        Ok(pool)
    }

    /// Output size, before anti-aliasing.
    pub fn output_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Size every pool target is rendered at.
    pub fn render_size(&self) -> (u32, u32) {
        (self.width * self.anti_alias, self.height * self.anti_alias)
    }

    pub fn anti_alias(&self) -> u32 {
        self.anti_alias
    }

    /// Downsample targets, largest first.
    pub fn ladder(&self) -> &[TargetId] {
        &self.ladder
    }

    pub fn target(&self, id: TargetId) -> Option<&RenderTarget> {
        self.targets.get(id.0)
    }

    /// Number of pool targets, excluding the ladder.
    pub fn len(&self) -> usize {
        self.targets.iter().filter(|target| !target.is_permanent()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unused_len(&self) -> usize {
        self.unused.len()
    }

    /// Checks out a target, creating one when the free list is empty. The
    /// contents are whatever was last rendered into it.
    pub fn request(&mut self, gpu: &mut dyn GpuContext) -> Result<TargetId> {
        if self.deleted {
            return Err(CompositorError::TargetsDeleted);
        }
        if let Some(id) = self.unused.pop() {
            self.targets[id.0].use_count = 1;
            return Ok(id);
        }
        let (width, height) = self.render_size();
        let (framebuffer, texture) = gpu.create_framebuffer(width, height)?;
        let id = TargetId(self.targets.len());
        self.targets.push(RenderTarget {
            framebuffer,
            texture,
            width,
            height,
            use_count: 1,
        });
        tracing::debug!(target_id = id.0, width, height, "grew render target pool");
        Ok(id)
    }

    /// Adds a reference to a checked-out target.
    pub fn retain(&mut self, id: TargetId) -> Result<()> {
        let target = self.targets.get_mut(id.0).ok_or(CompositorError::UnknownTarget(id))?;
        match target.use_count {
            PERMANENT => Err(CompositorError::PermanentTarget(id)),
            0 => Err(CompositorError::DoubleRelease(id)),
            _ => {
                target.use_count += 1;
                Ok(())
            }
        }
    }

    /// Drops one reference; the target returns to the free list at zero.
    pub fn release(&mut self, id: TargetId) -> Result<()> {
        let target = self.targets.get_mut(id.0).ok_or(CompositorError::UnknownTarget(id))?;
        match target.use_count {
            PERMANENT => Err(CompositorError::PermanentTarget(id)),
            0 => Err(CompositorError::DoubleRelease(id)),
            _ => {
                target.use_count -= 1;
                if target.use_count == 0 {
                    self.unused.push(id);
                }
                Ok(())
            }
        }
    }

    /// Returns every checked-out target to the free list, whatever its use
    /// count. Only sound when no holder of a target id survives, as after a
    /// frame that failed part way through.
    pub fn reclaim(&mut self) -> usize {
        let mut reclaimed = 0;
        for (index, target) in self.targets.iter_mut().enumerate() {
            if target.use_count > 0 {
                target.use_count = 0;
                self.unused.push(TargetId(index));
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Resizes every pool target. Only valid without anti-aliasing.
    pub fn resize(&mut self, gpu: &mut dyn GpuContext, width: u32, height: u32) -> Result<()> {
        if self.deleted {
            return Err(CompositorError::TargetsDeleted);
        }
        if self.anti_alias != 1 {
            return Err(CompositorError::ResizeWithAntiAlias(self.anti_alias));
        }
        self.width = width.max(1);
        self.height = height.max(1);
        for target in &mut self.targets {
            gpu.resize_framebuffer(target.framebuffer, self.width, self.height);
            target.width = self.width;
            target.height = self.height;
        }
        Ok(())
    }

    /// Frees every target. Fails while any target is checked out.
    pub fn delete(&mut self, gpu: &mut dyn GpuContext) -> Result<()> {
        if self.deleted {
            return Err(CompositorError::TargetsDeleted);
        }
        let in_use = self.targets.iter().filter(|target| target.use_count > 0).count();
        if in_use > 0 {
            return Err(CompositorError::TargetsInUse(in_use));
        }
        for target in self.targets.drain(..) {
            gpu.delete_framebuffer(target.framebuffer);
        }
        self.unused.clear();
        self.ladder.clear();
        self.deleted = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessGpu;

    #[test]
    fn request_and_release_return_everything_to_the_free_list() {
        let mut gpu = HeadlessGpu::new();
        let mut pool = RenderTargets::create(&mut gpu, 64, 32, 1).unwrap();
        let ids: Vec<TargetId> = (0..5).map(|_| pool.request(&mut gpu).unwrap()).collect();
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.unused_len(), 0);
        for id in ids {
            pool.release(id).unwrap();
        }
        assert_eq!(pool.len(), pool.unused_len());

        let again = pool.request(&mut gpu).unwrap();
        assert_eq!(pool.len(), 5, "free targets are reused");
        pool.release(again).unwrap();
    }

    #[test]
    fn double_release_is_fatal() {
        let mut gpu = HeadlessGpu::new();
        let mut pool = RenderTargets::create(&mut gpu, 8, 8, 1).unwrap();
        let id = pool.request(&mut gpu).unwrap();
        pool.retain(id).unwrap();
        pool.release(id).unwrap();
        pool.release(id).unwrap();
        assert!(matches!(pool.release(id), Err(CompositorError::DoubleRelease(_))));
        assert_eq!(pool.target(id).unwrap().use_count(), 0);
    }

    #[test]
    fn delete_fails_while_a_target_is_checked_out() {
        let mut gpu = HeadlessGpu::new();
        let mut pool = RenderTargets::create(&mut gpu, 8, 8, 1).unwrap();
        let id = pool.request(&mut gpu).unwrap();
        assert!(matches!(pool.delete(&mut gpu), Err(CompositorError::TargetsInUse(1))));
        pool.release(id).unwrap();
        pool.delete(&mut gpu).unwrap();
        assert_eq!(gpu.live_framebuffers(), 0);
        assert!(matches!(pool.request(&mut gpu), Err(CompositorError::TargetsDeleted)));
    }

    #[test]
    fn reclaim_frees_stranded_targets_but_not_the_ladder() {
        let mut gpu = HeadlessGpu::new();
        let mut pool = RenderTargets::create(&mut gpu, 16, 16, 4).unwrap();
        let first = pool.request(&mut gpu).unwrap();
        pool.retain(first).unwrap();
        let released = pool.request(&mut gpu).unwrap();
        pool.release(released).unwrap();
        pool.request(&mut gpu).unwrap();

        assert_eq!(pool.reclaim(), 2);
        assert_eq!(pool.len(), pool.unused_len());
        assert!(pool.ladder().iter().all(|&id| pool.target(id).unwrap().is_permanent()));
        assert_eq!(pool.reclaim(), 0);
        pool.delete(&mut gpu).unwrap();
        assert_eq!(gpu.live_framebuffers(), 0);
    }

    #[test]
    fn anti_alias_builds_a_permanent_ladder() {
        let mut gpu = HeadlessGpu::new();
        let mut pool = RenderTargets::create(&mut gpu, 100, 50, 8).unwrap();
        assert_eq!(pool.anti_alias(), 8);
        assert_eq!(pool.render_size(), (800, 400));
        let sizes: Vec<(u32, u32)> = pool
            .ladder()
            .iter()
            .map(|&id| {
                let target = pool.target(id).unwrap();
                (target.width, target.height)
            })
            .collect();
        assert_eq!(sizes, vec![(400, 200), (200, 100)]);
        assert_eq!(pool.len(), 0);

        let rung = pool.ladder()[0];
        assert!(matches!(pool.release(rung), Err(CompositorError::PermanentTarget(_))));
        assert!(matches!(
            pool.resize(&mut gpu, 10, 10),
            Err(CompositorError::ResizeWithAntiAlias(8))
        ));
    }

    #[test]
    fn anti_alias_is_limited_by_texture_size() {
        assert_eq!(achievable_anti_alias(1000, 500, 8, 4096), 4);
        assert_eq!(achievable_anti_alias(1000, 500, 6, 8192), 4);
        assert_eq!(achievable_anti_alias(5000, 10, 4, 4096), 1);
        assert_eq!(achievable_anti_alias(10, 10, 0, 4096), 1);
    }

    #[test]
    fn resize_updates_pool_targets() {
        let mut gpu = HeadlessGpu::new();
        let mut pool = RenderTargets::create(&mut gpu, 8, 8, 1).unwrap();
        let id = pool.request(&mut gpu).unwrap();
        pool.resize(&mut gpu, 32, 16).unwrap();
        assert_eq!(pool.render_size(), (32, 16));
        assert_eq!(pool.target(id).unwrap().width, 32);
    }
}
