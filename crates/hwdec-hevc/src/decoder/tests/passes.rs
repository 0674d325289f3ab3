use byteorder::{ByteOrder, LittleEndian};
use hwdec_core::{DeviceOp, Engine, HwdecError};

use super::helpers::*;
use crate::buffers::BufferKind;
use crate::config::DecoderConfig;
use crate::emitter::Command;
use crate::params::{PicEntry, SliceType};
use crate::phase::DecodePhase;
use crate::reference::RefIdxEntry;
use crate::status::CodecStatus;

use super::super::{FrameProgress, HwDecoder};

#[test]
fn test_single_pipe_long_format_sequence() {
    let mut dec = build_test_decoder(DecoderConfig::default());
    let mut pic = build_test_picture(0, 0);
    pic.status_report_feedback_number = 7;
    let sub = build_test_submission(&mut dec, pic, vec![build_test_slice(SliceType::I, 0, 1000, 0)]);
    assert_eq!(dec.execute(sub).expect("执行帧失败"), FrameProgress::Ready);

    assert_eq!(dec.phase_history(), &[DecodePhase::MainDecode]);
    assert_eq!(
        command_names(&dec),
        vec![
            "HCP_PIPE_MODE_SELECT",
            "HCP_SURFACE_STATE",
            "HCP_PIPE_BUF_ADDR_STATE",
            "HCP_IND_OBJ_BASE_ADDR_STATE",
            "HCP_QM_STATE",
            "HCP_PIC_STATE",
            "STATUS_REPORT_START",
            "HCP_SLICE_STATE",
            "HCP_BSD_OBJECT",
            "VD_PIPELINE_FLUSH",
            "MI_FLUSH_DW",
            "STATUS_REPORT_END",
            "MI_FLUSH_DW",
            "MI_BATCH_BUFFER_END",
        ]
    );
    assert!(
        dec.emitter().commands().iter().all(|(e, _)| *e == Engine::Video),
        "单管线命令都应在视频引擎上"
    );

    let reports = dec.take_status_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].feedback_number, 7);
    assert_eq!(reports[0].frame_index, 1);
    assert_eq!(reports[0].status, CodecStatus::Submitted);
    assert_eq!(dec.pass_count(), 0, "提交后不应还有就绪帧");
}

#[test]
fn test_short_format_runs_pre_process_first() {
    let mut dec = build_test_decoder(DecoderConfig {
        short_format: true,
        ..DecoderConfig::default()
    });
    let slices = vec![
        build_test_slice(SliceType::I, 0, 600, 0),
        build_test_slice(SliceType::I, 600, 400, 0),
    ];
    let sub = build_test_submission(&mut dec, build_test_picture(0, 0), slices);
    dec.execute(sub).expect("执行帧失败");

    assert_eq!(
        dec.phase_history(),
        &[DecodePhase::PreProcess, DecodePhase::MainDecode]
    );
    let names = command_names(&dec);
    assert_eq!(
        &names[..6],
        &[
            "HUC_IMEM_STATE",
            "HUC_PIPE_MODE_SELECT",
            "HUC_IND_OBJ_BASE_ADDR_STATE",
            "HUC_VIRTUAL_ADDR_STATE",
            "HUC_DMEM_STATE",
            "STATUS_REPORT_START",
        ]
    );
    assert_eq!(dec.emitter().count("HUC_STREAM_OBJECT"), 2);
    assert_eq!(dec.emitter().count("HCP_SLICE_STATE"), 0, "短格式不发射长格式 slice 命令");
    assert_eq!(dec.emitter().count("MI_BATCH_BUFFER_START"), 1);
    let starts = find_commands(&dec, |c| matches!(c, Command::HucStart { .. }));
    assert_eq!(
        starts,
        vec![Command::HucStart { last: false }, Command::HucStart { last: true }]
    );

    let dmem = find_commands(&dec, |c| matches!(c, Command::HucDmemState { .. }));
    let Some(Command::HucDmemState {
        buffer,
        offset,
        length,
    }) = dmem.first().cloned()
    else {
        panic!("缺少 DMEM 命令");
    };
    assert_eq!(offset, 0x2000);
    assert_eq!(length % 64, 0, "DMEM 传输长度应按 64 字节对齐");
    let contents = dec.device().contents(buffer).expect("DMEM 缓冲区应存在");
    assert_eq!(LittleEndian::read_u16(&contents[0..2]), 240);
    assert_eq!(LittleEndian::read_u16(&contents[2..4]), 135);

    // 预处理在视频引擎上先 signal, 主解码同在视频引擎无需等待
    let ops = dec.device().ops();
    assert!(ops.iter().any(|op| matches!(op, DeviceOp::Signal(Engine::Video, _))));
    assert_eq!(
        ops.iter()
            .filter(|op| matches!(op, DeviceOp::Submit(Engine::Video)))
            .count(),
        2
    );
}

#[test]
fn test_derived_resources_rotate_per_frame() {
    let mut dec = build_test_decoder(DecoderConfig {
        short_format: true,
        ..DecoderConfig::default()
    });
    let mut indices = Vec::new();
    let mut regions = Vec::new();
    for i in 0..3u8 {
        dec.emitter_mut().clear();
        run_intra_frame(&mut dec, i, i as i32);
        indices.push(dec.derived_index());
        let region = find_commands(&dec, |c| matches!(c, Command::HucVirtualAddress { .. }));
        regions.push(region);
    }
    assert_eq!(indices, vec![0, 1, 0]);
    assert_ne!(regions[0], regions[1], "相邻帧应使用不同的派生缓冲区");
    assert_eq!(regions[0], regions[2]);
}

#[test]
fn test_inter_frame_reference_commands() {
    let mut dec = build_test_decoder(DecoderConfig::default());
    run_intra_frame(&mut dec, 0, 0);
    dec.emitter_mut().clear();

    let pic = build_test_inter_picture(1, 4, &[(0, 0)]);
    let sub = build_test_submission(&mut dec, pic, vec![build_test_slice(SliceType::P, 0, 1000, 1)]);
    dec.execute(sub).expect("执行帧失败");

    let refs = find_commands(&dec, |c| matches!(c, Command::RefIdxState { .. }));
    assert_eq!(
        refs,
        vec![Command::RefIdxState {
            list: 0,
            entries: vec![RefIdxEntry {
                compacted: 0,
                long_term: false,
                poc_distance: 4,
            }],
        }]
    );
    let surfaces = find_commands(&dec, |c| matches!(c, Command::Surfaces(_)));
    let Some(Command::Surfaces(params)) = surfaces.first() else {
        panic!("缺少表面状态命令");
    };
    assert_eq!(params.references, vec![dest_surface(0)]);

    let slices = find_commands(&dec, |c| matches!(c, Command::SliceState(_)));
    let Some(Command::SliceState(slice)) = slices.first() else {
        panic!("缺少 slice 状态命令");
    };
    assert!(slice.temporal_mvp);
    assert!(slice.last);

    let reports = dec.take_status_reports();
    assert_eq!(reports[1].status, CodecStatus::Submitted);
    assert_eq!(
        dec.last_references().map(|r| r.active_count),
        Some(1)
    );
}

#[test]
fn test_missing_reference_is_concealed() {
    let mut dec = build_test_decoder(DecoderConfig::default());
    // 参考帧 5 从未解码
    let pic = build_test_inter_picture(1, 8, &[(5, 4)]);
    let sub = build_test_submission(&mut dec, pic, vec![build_test_slice(SliceType::P, 0, 1000, 1)]);
    dec.execute(sub).expect("缺失参考不应导致失败");

    let surfaces = find_commands(&dec, |c| matches!(c, Command::Surfaces(_)));
    let Some(Command::Surfaces(params)) = surfaces.first() else {
        panic!("缺少表面状态命令");
    };
    assert_eq!(params.references, vec![dest_surface(1)], "应以目标表面替代");
    let reports = dec.take_status_reports();
    assert_eq!(reports[0].status, CodecStatus::Concealed);
}

#[test]
fn test_intra_picture_disables_temporal_mvp() {
    let mut dec = build_test_decoder(DecoderConfig::default());
    let mut pic = build_test_picture(0, 0);
    pic.intra_pic = true;
    let sub = build_test_submission(&mut dec, pic, vec![build_test_slice(SliceType::P, 0, 1000, 1)]);
    dec.execute(sub).expect("执行帧失败");

    let slices = find_commands(&dec, |c| matches!(c, Command::SliceState(_)));
    let Some(Command::SliceState(slice)) = slices.first() else {
        panic!("缺少 slice 状态命令");
    };
    assert!(!slice.temporal_mvp, "帧内图像中的 P slice 不使用时域 MV 预测");
}

#[test]
fn test_intra_block_copy_uses_pre_loop_filter_surface() {
    let mut dec = build_test_decoder(DecoderConfig::default());
    let mut pic = build_test_picture(0, 0);
    pic.curr_pic_ref_enabled = true;
    pic.ref_frame_list[0] = PicEntry::new(0);
    pic.ref_frame_poc_list[0] = 0;
    let sub = build_test_submission(&mut dec, pic, vec![build_test_slice(SliceType::I, 0, 1000, 0)]);
    dec.execute(sub).expect("执行帧失败");

    let copy = dec
        .buffers()
        .get(BufferKind::RefBeforeLoopFilter)
        .map(|b| b.handle)
        .expect("帧内块拷贝应分配环路滤波前副本");
    let states = find_commands(&dec, |c| matches!(c, Command::PictureState(_)));
    let Some(Command::PictureState(state)) = states.first() else {
        panic!("缺少图像状态命令");
    };
    assert_eq!(state.ibc_ref_idx, Some(0));
    assert!(!state.cur_pic_intra);

    let buffers = find_commands(&dec, |c| matches!(c, Command::PipeBufferAddresses(_)));
    let Some(Command::PipeBufferAddresses(params)) = buffers.first() else {
        panic!("缺少管线缓冲区地址命令");
    };
    assert_eq!(params.references, vec![copy]);
    assert_eq!(params.pre_loop_filter, Some(copy));
}

#[test]
fn test_primitive_level_before_state_level_fails() {
    let mut dec = build_test_decoder(DecoderConfig::default());
    let sub = build_test_submission(
        &mut dec,
        build_test_picture(0, 0),
        vec![build_test_slice(SliceType::I, 0, 1000, 0)],
    );
    dec.set_frame_state(sub).expect("设置帧状态失败");

    let err = dec.decode_primitive_level().expect_err("阶段未推进时应失败");
    assert!(matches!(err, HwdecError::InternalConsistency(_)));
    let reports = dec.take_status_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, CodecStatus::Error);
    assert_eq!(dec.pass_count(), 0, "失败的帧应被放弃");

    assert!(
        dec.decode_state_level().is_err(),
        "没有就绪帧时图像级命令应失败"
    );
    assert!(dec.take_status_reports().is_empty());
}

#[test]
fn test_extra_pass_is_rejected() {
    let mut dec = build_test_decoder(DecoderConfig::default());
    let sub = build_test_submission(
        &mut dec,
        build_test_picture(0, 0),
        vec![build_test_slice(SliceType::I, 0, 1000, 0)],
    );
    dec.set_frame_state(sub).expect("设置帧状态失败");
    dec.decode_state_level().expect("图像级命令失败");
    dec.decode_state_level().expect_err("单管线只有一个通道");
}
