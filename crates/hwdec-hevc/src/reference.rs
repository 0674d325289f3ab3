//! 参考帧簿记.
//!
//! 每个 DPB 槽位保存一条参考记录 (表面句柄、POC、帧内标志、MV 槽位、参考列表快照),
//! 当前图像所在槽位每帧覆盖, 其余槽位跨帧保留.
//!
//! 每帧处理顺序:
//! 1. 在参考帧列表中失效 POC 重复的后出现条目
//! 2. 按三个 RPS 子集标记被引用的位置, 帧内块拷贝时强制标记自身
//! 3. 按原始位置升序压缩为 0..N 的硬件参考索引, N 超过 8 则拒绝该帧
//! 4. 写入当前槽位记录, 清空并重新标记 MV 缓冲池后为当前帧获取槽位
//!
//! 步骤 1-3 不修改任何状态, 参数非法时整帧在提交硬件工作前被拒绝.

use log::{debug, warn};

use hwdec_core::{HwdecError, HwdecResult, ResourceHandle};

use crate::limits::{MAX_ACTIVE_REFS, MAX_REF_FRAMES, NUM_DPB_SLOTS};
use crate::mv_pool::MvBufferPool;
use crate::params::{PicEntry, PictureParameters, SliceParameters};

/// DPB 槽位记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceListEntry {
    pub ref_pic: Option<ResourceHandle>,
    pub poc: i32,
    pub is_intra: bool,
    pub mv_index: Option<u8>,
    /// 解码该帧时的参考帧列表
    pub ref_frame_list: [PicEntry; MAX_REF_FRAMES],
}

impl Default for ReferenceListEntry {
    fn default() -> Self {
        Self {
            ref_pic: None,
            poc: 0,
            is_intra: false,
            mv_index: None,
            ref_frame_list: [PicEntry::INVALID; MAX_REF_FRAMES],
        }
    }
}

/// slice 级参考索引状态中的单个条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefIdxEntry {
    /// 压缩后的硬件参考索引
    pub compacted: u8,
    pub long_term: bool,
    /// 当前 POC 减参考 POC, 截断到 i8
    pub poc_distance: i8,
}

/// 单帧参考映射结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReferences {
    /// 参考帧列表位置 -> 压缩索引
    pub mapping: [Option<u8>; MAX_REF_FRAMES],
    pub active_count: usize,
    /// 当前帧的 MV 槽位
    pub mv_index: u8,
    pub cur_pic_intra: bool,
    /// 帧内块拷贝的自参考压缩索引
    pub ibc_ref_idx: Option<u8>,
    /// 自参考在参考帧列表中的位置
    pub ibc_position: Option<usize>,
    /// 当前图像需要环路滤波前副本
    pub pre_loop_filter_copy: bool,
    /// 去重后的参考帧列表
    pub ref_frame_list: [PicEntry; MAX_REF_FRAMES],
    pub poc_list: [i32; MAX_REF_FRAMES],
    pub curr_poc: i32,
}

impl FrameReferences {
    /// 按压缩索引排列的参考帧列表位置
    pub fn active_positions(&self) -> Vec<usize> {
        let mut positions: Vec<(u8, usize)> = self
            .mapping
            .iter()
            .enumerate()
            .filter_map(|(pos, m)| m.map(|c| (c, pos)))
            .collect();
        positions.sort_unstable();
        positions.into_iter().map(|(_, pos)| pos).collect()
    }

    /// 生成 slice 指定参考列表的索引状态
    ///
    /// 列表项指向未映射的位置时退化为索引 0 并记录警告.
    pub fn ref_idx_entries(&self, slice: &SliceParameters, list: usize) -> Vec<RefIdxEntry> {
        let count = slice.num_active_refs(list).min(MAX_REF_FRAMES);
        let mut entries = Vec::with_capacity(count);
        for k in 0..count {
            let pos = slice.ref_pic_list[list][k] as usize;
            let mapped = if pos < MAX_REF_FRAMES {
                self.mapping[pos]
            } else {
                None
            };
            let Some(compacted) = mapped else {
                warn!("slice L{list}[{k}] 指向未激活的参考位置 {pos}, 使用索引 0");
                entries.push(RefIdxEntry {
                    compacted: 0,
                    long_term: false,
                    poc_distance: 0,
                });
                continue;
            };
            let distance = self.curr_poc.saturating_sub(self.poc_list[pos]);
            entries.push(RefIdxEntry {
                compacted,
                long_term: self.ref_frame_list[pos].long_term,
                poc_distance: distance.clamp(i8::MIN as i32, i8::MAX as i32) as i8,
            });
        }
        entries
    }
}

/// 已解析的参考表面与 MV 缓冲
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedReferences {
    /// 按压缩索引排列
    pub surfaces: Vec<ResourceHandle>,
    pub mv_buffers: Vec<ResourceHandle>,
    /// 以替代参考填补的位置数量
    pub concealed: usize,
}

/// 参考帧簿记器
#[derive(Debug)]
pub struct ReferenceBookkeeper {
    entries: Vec<ReferenceListEntry>,
    prev_pic: Option<PicEntry>,
}

impl Default for ReferenceBookkeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl ReferenceBookkeeper {
    pub fn new() -> Self {
        Self {
            entries: vec![ReferenceListEntry::default(); NUM_DPB_SLOTS],
            prev_pic: None,
        }
    }

    pub fn entry(&self, frame_idx: u8) -> Option<&ReferenceListEntry> {
        self.entries.get(frame_idx as usize)
    }

    /// 处理当前帧的参考关系
    pub fn build_frame(
        &mut self,
        pic: &PictureParameters,
        dest: ResourceHandle,
        mv_pool: &mut MvBufferPool,
    ) -> HwdecResult<FrameReferences> {
        let curr_idx = pic.curr_pic.frame_idx;
        if !pic.curr_pic.is_valid() {
            return Err(HwdecError::InvalidParameter(format!(
                "HEVC: 当前图像帧索引 {curr_idx} 超出 DPB 容量"
            )));
        }

        let mut refs = compute_mapping(pic)?;

        // 写入当前槽位
        let slot = &mut self.entries[curr_idx as usize];
        *slot = ReferenceListEntry {
            ref_pic: Some(dest),
            poc: pic.curr_pic_order_cnt,
            is_intra: refs.cur_pic_intra,
            mv_index: None,
            ref_frame_list: refs.ref_frame_list,
        };

        // 上一帧有效时, 先清空再按参考列表重新标记
        if self.prev_pic.is_some_and(|p| p.is_valid()) {
            mv_pool.clear_all();
            for entry in refs.ref_frame_list.iter().filter(|e| e.is_valid()) {
                if let Some(mv) = self.entries[entry.frame_idx as usize].mv_index {
                    mv_pool.mark_in_use(mv, entry.frame_idx)?;
                }
            }
        }
        let mv_index = mv_pool.acquire(curr_idx)?;
        self.entries[curr_idx as usize].mv_index = Some(mv_index);
        self.prev_pic = Some(pic.curr_pic);

        refs.mv_index = mv_index;
        debug!(
            "帧 {curr_idx} POC={}: {} 个参考, MV 槽位 {mv_index}",
            pic.curr_pic_order_cnt, refs.active_count
        );
        Ok(refs)
    }

    /// 解析压缩参考位置对应的表面与 MV 缓冲
    ///
    /// 缺失的表面以第一个有效参考 (无则目标表面) 替代,
    /// 缺失的 MV 缓冲以第一个已解析的 MV 缓冲 (无则当前帧 MV 缓冲) 替代.
    pub fn resolve_surfaces(
        &self,
        refs: &FrameReferences,
        mv_pool: &MvBufferPool,
        dest: ResourceHandle,
        self_surface: ResourceHandle,
        current_mv: ResourceHandle,
    ) -> ResolvedReferences {
        let positions = refs.active_positions();
        let mut surfaces: Vec<Option<ResourceHandle>> = Vec::with_capacity(positions.len());
        let mut mvs: Vec<Option<ResourceHandle>> = Vec::with_capacity(positions.len());

        for &pos in &positions {
            if refs.ibc_position == Some(pos) {
                surfaces.push(Some(self_surface));
                mvs.push(Some(current_mv));
                continue;
            }
            let pic = refs.ref_frame_list[pos];
            let entry = pic
                .is_valid()
                .then(|| &self.entries[pic.frame_idx as usize]);
            surfaces.push(entry.and_then(|e| e.ref_pic));
            mvs.push(
                entry
                    .and_then(|e| e.mv_index)
                    .and_then(|mv| mv_pool.handle(mv)),
            );
        }

        let fallback_surface = surfaces.iter().flatten().next().copied().unwrap_or(dest);
        let fallback_mv = mvs.iter().flatten().next().copied().unwrap_or(current_mv);
        let concealed = surfaces.iter().filter(|s| s.is_none()).count();
        if concealed > 0 {
            warn!("{concealed} 个参考位置缺少有效表面, 使用替代参考");
        }

        ResolvedReferences {
            surfaces: surfaces
                .into_iter()
                .map(|s| s.unwrap_or(fallback_surface))
                .collect(),
            mv_buffers: mvs.into_iter().map(|m| m.unwrap_or(fallback_mv)).collect(),
            concealed,
        }
    }
}

/// 计算去重、标记与压缩结果, 不修改任何状态
fn compute_mapping(pic: &PictureParameters) -> HwdecResult<FrameReferences> {
    let mut list = pic.ref_frame_list;
    let poc = pic.ref_frame_poc_list;

    // POC 重复: 失效后出现的条目
    let mut duplicate = [false; MAX_REF_FRAMES];
    for m in 0..MAX_REF_FRAMES {
        if !list[m].is_valid() {
            continue;
        }
        for n in (m + 1)..MAX_REF_FRAMES {
            if list[n].is_valid() && poc[n] == poc[m] {
                debug!("参考位置 {n} 与 {m} POC={} 重复, 失效位置 {n}", poc[m]);
                list[n] = PicEntry::INVALID;
                duplicate[n] = true;
            }
        }
    }

    let mut used = [false; MAX_REF_FRAMES];
    for idx in pic.rps_entries() {
        let idx = idx as usize;
        if idx < MAX_REF_FRAMES && !duplicate[idx] {
            used[idx] = true;
        }
    }

    let ibc = pic.curr_pic_ref_enabled;
    let mut ibc_position = None;
    if ibc {
        ibc_position = (0..MAX_REF_FRAMES)
            .find(|&i| list[i].is_valid() && poc[i] == pic.curr_pic_order_cnt);
        match ibc_position {
            Some(i) => used[i] = true,
            None => warn!("帧内块拷贝: 参考帧列表中没有当前图像"),
        }
    }

    let mut mapping = [None; MAX_REF_FRAMES];
    let mut next = 0usize;
    for (pos, _) in used.iter().enumerate().filter(|(_, u)| **u) {
        if next >= MAX_ACTIVE_REFS {
            return Err(HwdecError::InvalidParameter(format!(
                "HEVC: 激活参考帧数量超过硬件上限 {MAX_ACTIVE_REFS}"
            )));
        }
        mapping[pos] = Some(next as u8);
        next += 1;
    }

    Ok(FrameReferences {
        mapping,
        active_count: next,
        mv_index: 0,
        cur_pic_intra: pic.is_intra() && !ibc,
        ibc_ref_idx: ibc_position.and_then(|i| mapping[i]),
        ibc_position,
        pre_loop_filter_copy: pic.needs_pre_loop_filter_copy(),
        ref_frame_list: list,
        poc_list: poc,
        curr_poc: pic.curr_pic_order_cnt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::RPS_UNUSED;
    use crate::params::SliceType;

    fn build_picture(curr: u8, poc: i32) -> PictureParameters {
        PictureParameters {
            pic_width_in_min_cbs_y: 80,
            pic_height_in_min_cbs_y: 45,
            log2_diff_max_min_luma_coding_block_size: 3,
            curr_pic: PicEntry::new(curr),
            curr_pic_order_cnt: poc,
            ..PictureParameters::default()
        }
    }

    /// 在参考帧列表位置 `pos` 放入帧 `frame_idx`, 并加入 before 子集
    fn add_ref(pic: &mut PictureParameters, pos: usize, frame_idx: u8, poc: i32) {
        pic.ref_frame_list[pos] = PicEntry::new(frame_idx);
        pic.ref_frame_poc_list[pos] = poc;
        let slot = pic
            .ref_pic_set_st_curr_before
            .iter()
            .chain(pic.ref_pic_set_st_curr_after.iter())
            .position(|&v| v == RPS_UNUSED)
            .expect("RPS 子集已满");
        if slot < MAX_ACTIVE_REFS {
            pic.ref_pic_set_st_curr_before[slot] = pos as u8;
        } else {
            pic.ref_pic_set_st_curr_after[slot - MAX_ACTIVE_REFS] = pos as u8;
        }
    }

    #[test]
    fn test_eight_refs_compact_without_gaps() {
        let mut pic = build_picture(20, 100);
        for (i, pos) in [0usize, 2, 3, 5, 8, 9, 11, 14].iter().enumerate() {
            add_ref(&mut pic, *pos, i as u8, i as i32 * 2);
        }
        let refs = compute_mapping(&pic).expect("8 个参考应被接受");
        assert_eq!(refs.active_count, 8);
        let compacted: Vec<u8> = refs.mapping.iter().flatten().copied().collect();
        assert_eq!(compacted, (0..8).collect::<Vec<u8>>(), "压缩索引应连续且按位置升序");
        assert_eq!(refs.active_positions(), vec![0, 2, 3, 5, 8, 9, 11, 14]);
    }

    #[test]
    fn test_ninth_distinct_ref_rejected() {
        let mut pic = build_picture(20, 100);
        for pos in 0..9 {
            add_ref(&mut pic, pos, pos as u8, pos as i32);
        }
        let err = compute_mapping(&pic).expect_err("第 9 个参考应被拒绝");
        assert_eq!(err.kind(), hwdec_core::ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_duplicate_poc_excludes_later_position() {
        let mut pic = build_picture(20, 100);
        add_ref(&mut pic, 3, 3, 40);
        add_ref(&mut pic, 7, 7, 40);
        add_ref(&mut pic, 1, 1, 10);
        let refs = compute_mapping(&pic).expect("映射失败");
        assert_eq!(refs.mapping[3], Some(1));
        assert_eq!(refs.mapping[7], None, "POC 重复的后出现位置应被排除");
        assert_eq!(refs.active_count, 2);
        assert!(!refs.ref_frame_list[7].is_valid());
    }

    #[test]
    fn test_dedupe_happens_before_cap() {
        // 9 个原始条目, 去重后 8 个
        let mut pic = build_picture(20, 100);
        for pos in 0..8 {
            add_ref(&mut pic, pos, pos as u8, pos as i32 * 4);
        }
        add_ref(&mut pic, 8, 8, 0);
        let refs = compute_mapping(&pic).expect("去重后不超过 8 个应被接受");
        assert_eq!(refs.active_count, 8);
    }

    #[test]
    fn test_mapping_is_deterministic() {
        let mut pic = build_picture(20, 100);
        add_ref(&mut pic, 4, 4, 30);
        add_ref(&mut pic, 6, 6, 30);
        add_ref(&mut pic, 2, 2, 50);
        let a = compute_mapping(&pic).expect("映射失败");
        let b = compute_mapping(&pic).expect("映射失败");
        assert_eq!(a, b);
    }

    #[test]
    fn test_ibc_self_reference_index() {
        let mut pic = build_picture(5, 64);
        pic.curr_pic_ref_enabled = true;
        pic.intra_pic = true;
        add_ref(&mut pic, 0, 1, 60);
        pic.ref_frame_list[2] = PicEntry::long_term(5);
        pic.ref_frame_poc_list[2] = 64;
        let refs = compute_mapping(&pic).expect("映射失败");
        assert_eq!(refs.ibc_position, Some(2));
        assert_eq!(refs.ibc_ref_idx, Some(1));
        assert!(!refs.cur_pic_intra, "帧内块拷贝图像不视为帧内图像");
        assert!(refs.pre_loop_filter_copy, "去块滤波启用时需要环路滤波前副本");
    }

    #[test]
    fn test_build_frame_tracks_mv_slots() {
        let mut book = ReferenceBookkeeper::new();
        let mut pool = MvBufferPool::new();

        let first = build_picture(0, 0);
        let r0 = book
            .build_frame(&first, ResourceHandle(100), &mut pool)
            .expect("第一帧失败");

        let mut second = build_picture(1, 1);
        add_ref(&mut second, 0, 0, 0);
        let r1 = book
            .build_frame(&second, ResourceHandle(101), &mut pool)
            .expect("第二帧失败");
        assert_ne!(r0.mv_index, r1.mv_index, "被参考帧的 MV 槽位不能复用");
        assert_eq!(pool.find_slot_for_frame(0), Some(r0.mv_index));

        // 第三帧不再参考帧 0, 其槽位可被复用
        let third = build_picture(2, 2);
        let r2 = book
            .build_frame(&third, ResourceHandle(102), &mut pool)
            .expect("第三帧失败");
        assert_eq!(r2.mv_index, r0.mv_index);
        assert_eq!(book.entry(0).and_then(|e| e.ref_pic), Some(ResourceHandle(100)));
        assert!(book.entry(2).is_some_and(|e| e.is_intra));
    }

    #[test]
    fn test_rejected_frame_leaves_state_untouched() {
        let mut book = ReferenceBookkeeper::new();
        let mut pool = MvBufferPool::new();
        let mut pic = build_picture(3, 10);
        for pos in 0..9 {
            add_ref(&mut pic, pos, pos as u8 + 10, pos as i32);
        }
        assert!(book.build_frame(&pic, ResourceHandle(1), &mut pool).is_err());
        assert_eq!(book.entry(3).and_then(|e| e.ref_pic), None);
        assert_eq!(pool.in_use_count(), 0);
    }

    #[test]
    fn test_concealment_fills_missing_surfaces() {
        let mut book = ReferenceBookkeeper::new();
        let mut pool = MvBufferPool::new();
        book.build_frame(&build_picture(0, 0), ResourceHandle(100), &mut pool)
            .expect("第一帧失败");

        // 位置 1 指向从未解码的帧 9
        let mut pic = build_picture(1, 8);
        add_ref(&mut pic, 0, 0, 0);
        add_ref(&mut pic, 1, 9, 4);
        let refs = book
            .build_frame(&pic, ResourceHandle(101), &mut pool)
            .expect("第二帧失败");
        let resolved = book.resolve_surfaces(
            &refs,
            &pool,
            ResourceHandle(101),
            ResourceHandle(101),
            ResourceHandle(500),
        );
        assert_eq!(resolved.concealed, 1);
        assert_eq!(
            resolved.surfaces,
            vec![ResourceHandle(100), ResourceHandle(100)],
            "缺失位置应以第一个有效参考填补"
        );
        assert_eq!(resolved.mv_buffers.len(), 2);
    }

    #[test]
    fn test_ref_idx_poc_distance_clamped() {
        let mut pic = build_picture(1, 300);
        add_ref(&mut pic, 0, 0, 298);
        add_ref(&mut pic, 1, 2, 0);
        pic.ref_frame_list[1].long_term = true;
        let refs = compute_mapping(&pic).expect("映射失败");

        let mut slice = SliceParameters {
            slice_type: SliceType::P,
            num_ref_idx_l0_active_minus1: 1,
            ..SliceParameters::default()
        };
        slice.ref_pic_list[0][0] = 0;
        slice.ref_pic_list[0][1] = 1;
        let entries = refs.ref_idx_entries(&slice, 0);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].poc_distance, 2);
        assert_eq!(entries[1].poc_distance, 127, "POC 差应截断到 i8");
        assert!(entries[1].long_term);
        assert!(refs.ref_idx_entries(&slice, 1).is_empty());
    }
}
