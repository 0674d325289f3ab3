use hwdec_core::{MockDevice, ResourceHandle};

use crate::config::DecoderConfig;
use crate::emitter::{Command, RecordingEmitter};
use crate::params::{IqMatrix, PicEntry, PictureParameters, SliceParameters, SliceType};

use super::super::{FrameProgress, FrameSubmission, HevcDecoder, HwDecoder};

pub type TestDecoder = HevcDecoder<MockDevice, RecordingEmitter>;

/// 目标表面句柄, 与设备分配的句柄区分开
pub fn dest_surface(frame_idx: u8) -> ResourceHandle {
    ResourceHandle(10_000 + frame_idx as u32)
}

pub fn build_test_decoder(config: DecoderConfig) -> TestDecoder {
    HevcDecoder::new(config, MockDevice::new(), RecordingEmitter::new())
}

/// 1920x1080, CTB 64, 4:2:0 8bit 帧内图像
pub fn build_test_picture(curr: u8, poc: i32) -> PictureParameters {
    PictureParameters {
        pic_width_in_min_cbs_y: 240,
        pic_height_in_min_cbs_y: 135,
        log2_min_luma_coding_block_size_minus3: 0,
        log2_diff_max_min_luma_coding_block_size: 3,
        curr_pic: PicEntry::new(curr),
        curr_pic_order_cnt: poc,
        ..PictureParameters::default()
    }
}

/// 以 `refs` 中的 (帧索引, POC) 作为前向短期参考的图像
pub fn build_test_inter_picture(curr: u8, poc: i32, refs: &[(u8, i32)]) -> PictureParameters {
    let mut pic = build_test_picture(curr, poc);
    for (i, &(idx, ref_poc)) in refs.iter().enumerate() {
        pic.ref_frame_list[i] = PicEntry::new(idx);
        pic.ref_frame_poc_list[i] = ref_poc;
        pic.ref_pic_set_st_curr_before[i] = i as u8;
    }
    pic
}

/// 引用参考帧列表前 `num_refs` 个位置的 slice
pub fn build_test_slice(slice_type: SliceType, offset: u32, size: u32, num_refs: u8) -> SliceParameters {
    let mut slice = SliceParameters::short(offset, size);
    slice.slice_type = slice_type;
    slice.slice_temporal_mvp_enabled = true;
    if num_refs > 0 {
        slice.num_ref_idx_l0_active_minus1 = num_refs - 1;
        slice.num_ref_idx_l1_active_minus1 = num_refs - 1;
        for k in 0..num_refs {
            slice.ref_pic_list[0][k as usize] = k;
            slice.ref_pic_list[1][k as usize] = k;
        }
    }
    slice
}

/// 上传覆盖全部 slice 的码流并构造首次提交
pub fn build_test_submission(
    dec: &mut TestDecoder,
    picture: PictureParameters,
    slices: Vec<SliceParameters>,
) -> FrameSubmission {
    let size = slices
        .iter()
        .map(|s| s.slice_data_offset + s.slice_data_size)
        .max()
        .unwrap_or(0);
    let bitstream = dec
        .device_mut()
        .upload("bitstream", &vec![0x5a; size as usize])
        .expect("上传码流失败");
    let dest = dest_surface(picture.curr_pic.frame_idx);
    FrameSubmission::first(picture, slices, IqMatrix::default(), dest, bitstream, size)
}

/// 提交并执行一帧单 slice 帧内图像
pub fn run_intra_frame(dec: &mut TestDecoder, curr: u8, poc: i32) {
    let pic = build_test_picture(curr, poc);
    let sub = build_test_submission(dec, pic, vec![build_test_slice(SliceType::I, 0, 1000, 0)]);
    let progress = dec.execute(sub).expect("执行帧失败");
    assert_eq!(progress, FrameProgress::Ready);
}

/// 已记录命令的名称序列
pub fn command_names(dec: &TestDecoder) -> Vec<&'static str> {
    dec.emitter().commands().iter().map(|(_, c)| c.name()).collect()
}

/// 已记录命令中满足条件的命令
pub fn find_commands<F>(dec: &TestDecoder, pred: F) -> Vec<Command>
where
    F: Fn(&Command) -> bool,
{
    dec.emitter()
        .commands()
        .iter()
        .filter(|(_, c)| pred(c))
        .map(|(_, c)| c.clone())
        .collect()
}
