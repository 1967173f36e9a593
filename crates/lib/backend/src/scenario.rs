// Copyright (C) 2023 gigablaster

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Record, submit and replay through the public surface.

use std::sync::Arc;

use ash::vk;

use crate::{
    testing::{init_logging, CallLog, Fixture},
    BufferDesc, BufferHandle, Command, CommandBuffer, ConstantFormat, DescriptorBufferInfo,
    DescriptorSetLayoutDesc, Device, GraphicsPipelineDesc, PipelineHandle, PipelineLayoutDesc,
    ShaderModuleDesc, WriteDescriptorSet,
};

fn submit(device: &Arc<Device>, cb: &CommandBuffer) {
    device.queue(0).unwrap().submit(&[cb], None).unwrap();
}

fn vertex_buffer(device: &Device) -> BufferHandle {
    device
        .create_buffer(BufferDesc::gpu(1024, vk::BufferUsageFlags::VERTEX_BUFFER))
        .unwrap()
}

fn blended_pipeline(fixture: &Fixture) -> PipelineHandle {
    let device = &fixture.device;
    let vertex = device
        .create_shader_module(ShaderModuleDesc::vertex("void main() {}"))
        .unwrap();
    let fragment = device
        .create_shader_module(ShaderModuleDesc::fragment("void main() {}"))
        .unwrap();
    device
        .create_graphics_pipeline(
            GraphicsPipelineDesc::new(fixture.layout, fixture.render_pass, 0)
                .stage(vertex)
                .stage(fragment)
                .vertex_binding(0, 12, vk::VertexInputRate::VERTEX)
                .vertex_attribute(0, 0, vk::Format::R32G32B32_SFLOAT, 0)
                .alpha_blend(),
        )
        .unwrap()
}

#[test]
fn clear_reaches_driver_after_submit() {
    init_logging();
    let log = Arc::new(CallLog::default());
    let fixture = Fixture::new(&log);
    let device = &fixture.device;
    let fence = device.create_fence(false);
    let mut cb = CommandBuffer::primary(device);
    cb.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
        .unwrap();
    fixture.begin_pass(&mut cb, [1.0, 0.0, 0.0, 1.0]);
    cb.end_render_pass();
    cb.end().unwrap();

    log.clear();
    device
        .queue(0)
        .unwrap()
        .submit(&[&cb], Some(fence))
        .unwrap();
    let clears = log.named("clear_buffer_fv");
    assert_eq!(1, clears.len());
    assert_eq!(
        vec![1.0, 0.0, 0.0, 1.0],
        (2..6).map(|index| clears[0].arg(index)).collect::<Vec<_>>()
    );
    device.wait_for_fences(&[fence], true, u64::MAX).unwrap();
    assert!(device.fence_status(fence).unwrap());
}

#[test]
fn blend_toggles_once_per_transition() {
    let log = Arc::new(CallLog::default());
    let fixture = Fixture::new(&log);
    let device = &fixture.device;
    let opaque = fixture.pipeline(&[]);
    let blended = blended_pipeline(&fixture);
    let vertices = vertex_buffer(device);

    let mut cb = CommandBuffer::primary(device);
    cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
    fixture.begin_pass(&mut cb, [0.0; 4]);
    cb.bind_vertex_buffers(0, &[vertices], &[0]);
    for pipeline in [opaque, blended, opaque] {
        cb.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
        cb.draw(3, 1, 0, 0);
    }
    cb.end_render_pass();
    cb.end().unwrap();

    submit(device, &cb);
    log.clear();
    submit(device, &cb);
    assert_eq!(1, log.count("enable_i"));
    assert_eq!(1, log.count("disable_i"));
    assert_eq!(0, log.count("blend_func_separate_i"));
    assert_eq!(3, log.count("draw_arrays"));
    let lock = device.main_context().lock().unwrap();
    assert_eq!(Some(false), lock.state().blend_enabled(0));
}

#[test]
fn fragment_push_block_uploads_each_member() {
    let log = Arc::new(CallLog::default());
    let fixture = Fixture::new(&log);
    let device = &fixture.device;
    let vertex = device
        .create_shader_module(
            ShaderModuleDesc::vertex("void main() {}").push_constant(
                "scale",
                96,
                ConstantFormat::Vec4,
            ),
        )
        .unwrap();
    let fragment = device
        .create_shader_module(
            ShaderModuleDesc::fragment("void main() {}")
                .push_constant("tint", 0, ConstantFormat::Vec4)
                .push_constant("transform", 16, ConstantFormat::Mat4),
        )
        .unwrap();
    let pipeline = device
        .create_graphics_pipeline(
            GraphicsPipelineDesc::new(fixture.layout, fixture.render_pass, 0)
                .stage(vertex)
                .stage(fragment)
                .vertex_binding(0, 12, vk::VertexInputRate::VERTEX)
                .vertex_attribute(0, 0, vk::Format::R32G32B32_SFLOAT, 0)
                .opaque(),
        )
        .unwrap();
    let vertices = vertex_buffer(device);
    let block = (0..28).map(|value| value as f32).collect::<Vec<_>>();
    let bytes = block
        .iter()
        .flat_map(|value| value.to_ne_bytes())
        .collect::<Vec<_>>();

    let mut cb = CommandBuffer::primary(device);
    cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
    fixture.begin_pass(&mut cb, [0.0; 4]);
    cb.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
    cb.push_constants(fixture.layout, vk::ShaderStageFlags::FRAGMENT, 0, &bytes);
    cb.bind_vertex_buffers(0, &[vertices], &[0]);
    cb.draw(3, 1, 0, 0);
    cb.end_render_pass();
    cb.end().unwrap();

    let uniforms = cb
        .commands()
        .iter()
        .filter_map(|command| match command {
            Command::Uniform {
                offset,
                format,
                stages,
                ..
            } => Some((*offset, *format, *stages)),
            _ => None,
        })
        .collect::<Vec<_>>();
    assert_eq!(
        vec![
            (0, ConstantFormat::Vec4, vk::ShaderStageFlags::FRAGMENT),
            (16, ConstantFormat::Mat4, vk::ShaderStageFlags::FRAGMENT),
        ],
        uniforms
    );

    log.clear();
    submit(device, &cb);
    let uploads = log
        .names()
        .into_iter()
        .filter(|name| name.starts_with("uniform_"))
        .collect::<Vec<_>>();
    assert_eq!(vec!["uniform_fv", "uniform_matrix_fv"], uploads);
    let tint = &log.named("uniform_fv")[0];
    assert_eq!(
        vec![0.0, 1.0, 2.0, 3.0],
        (2..6).map(|index| tint.arg(index)).collect::<Vec<_>>()
    );
}

#[test]
fn clone_outlives_rerecorded_original() {
    let log = Arc::new(CallLog::default());
    let fixture = Fixture::new(&log);
    let device = &fixture.device;
    let mut cb = CommandBuffer::primary(device);
    cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
    fixture.begin_pass(&mut cb, [0.0, 1.0, 0.0, 1.0]);
    cb.end_render_pass();
    cb.end().unwrap();
    let copy = cb.clone();
    assert_eq!(cb.commands(), copy.commands());

    cb.reset();
    cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
    fixture.begin_pass(&mut cb, [0.0, 0.0, 1.0, 1.0]);
    cb.end_render_pass();
    cb.end().unwrap();

    log.clear();
    device
        .queue(0)
        .unwrap()
        .submit(&[&copy, &cb], None)
        .unwrap();
    let greens = log
        .named("clear_buffer_fv")
        .iter()
        .map(|call| (call.arg(3), call.arg(4)))
        .collect::<Vec<_>>();
    assert_eq!(vec![(1.0, 0.0), (0.0, 1.0)], greens);
}

#[test]
fn descriptor_binding_is_deterministic() {
    let log = Arc::new(CallLog::default());
    let fixture = Fixture::new(&log);
    let device = &fixture.device;
    let stages = vk::ShaderStageFlags::ALL_GRAPHICS;
    let forward = device
        .create_descriptor_set_layout(
            DescriptorSetLayoutDesc::default()
                .binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1, stages)
                .binding(1, vk::DescriptorType::UNIFORM_BUFFER, 2, stages),
        )
        .unwrap();
    let reversed = device
        .create_descriptor_set_layout(
            DescriptorSetLayoutDesc::default()
                .binding(1, vk::DescriptorType::UNIFORM_BUFFER, 2, stages)
                .binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1, stages),
        )
        .unwrap();
    let layouts = [forward, reversed].map(|set_layout| {
        device
            .create_pipeline_layout(PipelineLayoutDesc::default().set_layout(set_layout))
            .unwrap()
    });
    {
        let storage = device.pipeline_layout_storage.read();
        let [a, b] = layouts.map(|layout| storage.get(layout).unwrap().clone());
        for binding in [0, 1] {
            assert_eq!(a.slot(0, binding), b.slot(0, binding));
        }
        assert_eq!(1, a.slot(0, 1).unwrap().first);
    }

    let buffer = device
        .create_buffer(BufferDesc::gpu(4096, vk::BufferUsageFlags::UNIFORM_BUFFER))
        .unwrap();
    let info = |offset| DescriptorBufferInfo {
        buffer,
        offset,
        range: 256,
    };
    let record = |layout, set_layout| {
        let set = device.allocate_descriptor_set(set_layout).unwrap();
        device.update_descriptor_sets(
            &[WriteDescriptorSet::buffers(
                set,
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                &[info(0), info(256), info(512)],
            )],
            &[],
        );
        let mut cb = CommandBuffer::primary(device);
        cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        cb.bind_descriptor_sets(vk::PipelineBindPoint::GRAPHICS, layout, 0, &[set], &[]);
        cb.end().unwrap();
        cb
    };
    let first = record(layouts[0], forward);
    let second = record(layouts[1], reversed);
    assert_eq!(3, first.commands().len());
    assert_eq!(first.commands(), second.commands());

    log.clear();
    submit(device, &first);
    let ranges = log.named("bind_buffer_range");
    assert_eq!(3, ranges.len());
    assert_eq!(
        vec![(0.0, 0.0), (1.0, 256.0), (2.0, 512.0)],
        ranges
            .iter()
            .map(|call| (call.arg(1), call.arg(3)))
            .collect::<Vec<_>>()
    );
}

#[test]
fn vertex_arrays_follow_buffer_lifetime() {
    let log = Arc::new(CallLog::default());
    let fixture = Fixture::new(&log);
    let device = &fixture.device;
    let pipeline = fixture.pipeline(&[]);
    let record = |vertices| {
        let mut cb = CommandBuffer::primary(device);
        cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
        fixture.begin_pass(&mut cb, [0.0; 4]);
        cb.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
        cb.bind_vertex_buffers(0, &[vertices], &[0]);
        cb.draw(3, 1, 0, 0);
        cb.end_render_pass();
        cb.end().unwrap();
        cb
    };

    let vertices = vertex_buffer(device);
    let first = record(vertices);
    let again = record(vertices);
    assert_eq!(1, device.geometry.lock().len());
    log.clear();
    submit(device, &first);
    submit(device, &again);
    assert_eq!(1, log.count("create_vertex_array"));

    log.clear();
    device.destroy_buffer(vertices);
    assert!(device.geometry.lock().is_empty());
    let replacement = vertex_buffer(device);
    let third = record(replacement);
    submit(device, &third);
    assert_eq!(1, log.count("delete_vertex_array"));
    assert_eq!(1, log.count("create_vertex_array"));
}

#[test]
fn streamed_offsets_share_vertex_array() {
    let log = Arc::new(CallLog::default());
    let fixture = Fixture::new(&log);
    let device = &fixture.device;
    let pipeline = fixture.pipeline(&[]);
    let vertices = vertex_buffer(device);

    let mut cb = CommandBuffer::primary(device);
    cb.begin(vk::CommandBufferUsageFlags::empty()).unwrap();
    fixture.begin_pass(&mut cb, [0.0; 4]);
    cb.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, pipeline);
    for frame in 0..4 {
        cb.bind_vertex_buffers(0, &[vertices], &[frame * 36]);
        cb.draw(3, 1, 0, 0);
    }
    cb.end_render_pass();
    cb.end().unwrap();
    assert_eq!(1, device.geometry.lock().len());

    log.clear();
    submit(device, &cb);
    assert_eq!(1, log.count("create_vertex_array"));
    let offsets = log
        .named("vertex_attrib_pointer")
        .iter()
        .map(|call| call.arg(6))
        .collect::<Vec<_>>();
    assert_eq!(vec![0.0, 36.0, 72.0, 108.0], offsets);
}
