use anyhow::Result;
use ash::vk;
use glam::{Mat4, Vec3};

use vk_accel::{pack_instances, Error, Instance, InstanceDescriptor, TransformMatrix, INSTANCE_DESCRIPTOR_SIZE};

use framework::MockFunctions;

mod framework;

fn word(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}

#[test]
pub fn transform_is_row_major() {
    let matrix = Mat4::from_cols_array(&[
        1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0,
    ]);
    let transform = TransformMatrix::from_mat4(&matrix);
    assert_eq!(
        transform.elements(),
        &[1.0, 5.0, 9.0, 13.0, 2.0, 6.0, 10.0, 14.0, 3.0, 7.0, 11.0, 15.0],
        "Packed transform should hold the top three rows."
    );

    let translation = TransformMatrix::from(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
    let elements = translation.elements();
    assert_eq!([elements[3], elements[7], elements[11]], [1.0, 2.0, 3.0]);
    assert_eq!(
        TransformMatrix::from(Mat4::IDENTITY).elements(),
        &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]
    );
}

#[test]
pub fn pack_record_layout() -> Result<()> {
    let mut ctx = framework::make_context();
    let blas = framework::built_blas(&mut ctx, 1)?;

    let matrix = Mat4::from_cols_array(&[
        1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0, 7.0, 8.0, 9.0, 0.0, 10.0, 11.0, 12.0, 1.0,
    ]);
    let instance = Instance::new(blas.handle(), matrix, 5, 2);
    let bytes = InstanceDescriptor::pack(&ctx.fns, &instance)?.to_bytes();

    assert_eq!(bytes.len(), 64, "Instance record must be exactly 64 bytes.");
    let expected = [1.0f32, 4.0, 7.0, 10.0, 2.0, 5.0, 8.0, 11.0, 3.0, 6.0, 9.0, 12.0];
    for (i, value) in expected.iter().enumerate() {
        assert_eq!(f32::from_bits(word(&bytes, i * 4)), *value, "Transform element {i} is wrong.");
    }
    assert_eq!(word(&bytes, 48), 0xFF00_0005, "Instance id in the low 24 bits, mask in the high 8.");
    let cull_disable = vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw();
    assert_eq!(word(&bytes, 52), 2 | (cull_disable << 24), "Hit group in the low 24 bits, flags in the high 8.");
    let mut handle = [0u8; 8];
    handle.copy_from_slice(&bytes[56..64]);
    assert_eq!(u64::from_le_bytes(handle), MockFunctions::reference_of(blas.handle()));
    Ok(())
}

#[test]
pub fn unpack_record() -> Result<()> {
    let mut ctx = framework::make_context();
    let blas = framework::built_blas(&mut ctx, 1)?;

    let instance = Instance::new(blas.handle(), Mat4::from_scale(Vec3::splat(2.0)), 77, 3)
        .mask(0x0F)
        .flags(vk::GeometryInstanceFlagsKHR::FORCE_OPAQUE);
    let descriptor = InstanceDescriptor::pack(&ctx.fns, &instance)?;
    let decoded = InstanceDescriptor::from_bytes(&descriptor.to_bytes());

    assert_eq!(decoded, descriptor);
    assert_eq!(decoded.instance_id, 77);
    assert_eq!(decoded.mask, 0x0F);
    assert_eq!(decoded.hit_group_id, 3);
    assert_eq!(decoded.flags as u32, vk::GeometryInstanceFlagsKHR::FORCE_OPAQUE.as_raw());
    assert_eq!(decoded.transform[0], 2.0);
    Ok(())
}

#[test]
pub fn ids_are_truncated_to_24_bits() -> Result<()> {
    let mut ctx = framework::make_context();
    let blas = framework::built_blas(&mut ctx, 1)?;

    let instance = Instance::new(blas.handle(), Mat4::IDENTITY, 0x0123_4567, 0xFF_FFFF + 2);
    let descriptor = InstanceDescriptor::pack(&ctx.fns, &instance)?;
    assert_eq!(descriptor.instance_id, 0x23_4567);
    assert_eq!(descriptor.hit_group_id, 1);
    assert_eq!(descriptor.mask, 0xFF, "Truncated id must not leak into the mask.");
    Ok(())
}

#[test]
pub fn pack_fails_for_unbuilt_structure() {
    let ctx = framework::make_context();

    let null = Instance::new(vk::AccelerationStructureNV::null(), Mat4::IDENTITY, 0, 0);
    let err = framework::error_of(InstanceDescriptor::pack(&ctx.fns, &null));
    assert!(matches!(err, Error::NullAccelerationStructure));

    let unknown = Instance::new(vk::Handle::from_raw(0xDEAD), Mat4::IDENTITY, 0, 0);
    assert!(InstanceDescriptor::pack(&ctx.fns, &unknown).is_err(), "Unbuilt structure has no handle.");
}

#[test]
pub fn default_instance_is_identity() -> Result<()> {
    let mut ctx = framework::make_context();
    let blas = framework::built_blas(&mut ctx, 1)?;

    let default = Instance::default();
    assert_eq!(default.blas, vk::AccelerationStructureNV::null());
    assert_eq!(default.transform, Mat4::IDENTITY);
    assert_eq!((default.instance_id, default.hit_group_id, default.mask), (0, 0, 0xFF));
    assert_eq!(default.flags, vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE);

    let instance = Instance {
        blas: blas.handle(),
        ..Default::default()
    };
    let descriptor = InstanceDescriptor::pack(&ctx.fns, &instance)?;
    assert_eq!(descriptor.transform, [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    assert_eq!(descriptor.mask, 0xFF);
    Ok(())
}

#[test]
pub fn pack_all_instances() -> Result<()> {
    let mut ctx = framework::make_context();
    let blas = framework::built_blas(&mut ctx, 1)?;

    let instances = (0..3)
        .map(|i| Instance::new(blas.handle(), Mat4::IDENTITY, i, 0))
        .collect::<Vec<_>>();
    let data = pack_instances(&ctx.fns, &instances)?;
    assert_eq!(data.len(), 3 * INSTANCE_DESCRIPTOR_SIZE);
    assert_eq!(word(&data, 64 + 48) & 0xFF_FFFF, 1, "Second record should hold the second instance.");

    assert!(pack_instances(&ctx.fns, &[]).map(|d| d.is_empty())?);
    Ok(())
}
