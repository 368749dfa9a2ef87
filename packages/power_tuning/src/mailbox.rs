//! The overclocking mailbox: a command/reply protocol layered over a single model-specific
//! register, through which voltage/frequency settings of each domain are read and written.

use std::hint;

use bit_field::BitField;

use crate::error::Result;
use crate::{
    CpuProfile, DomainKind, Error, IccMax, Milliamps, Millivolts, Msr, RegisterAccess, VfCapability,
    VfSettings, VoltageMode,
};

/// Reads the overclocking capabilities of a domain.
pub(crate) const READ_CAPABILITIES: u8 = 0x01;

/// Reads the V/F settings of a domain or of one of its curve points.
pub(crate) const READ_VF: u8 = 0x10;

/// Writes the V/F settings of a domain or of one of its curve points.
pub(crate) const WRITE_VF: u8 = 0x11;

/// Reads the IccMax current limit of a domain.
pub(crate) const READ_ICC_MAX: u8 = 0x16;

/// Writes the IccMax current limit of a domain.
pub(crate) const WRITE_ICC_MAX: u8 = 0x17;

/// How many times the busy flag is polled before giving up on a command.
pub(crate) const MAILBOX_POLL_LIMIT: usize = 1_000;

const BUSY_BIT: usize = 63;
const ICC_MAX_UNLIMITED_BIT: usize = 31;

/// Milliamperes per raw IccMax step (1/4 A).
const ICC_MAX_STEP_MILLIAMPS: u32 = 250;

/// Builds the raw register value that submits a command.
pub(crate) fn encode_request(command: u8, domain: DomainKind, param2: u8, data: u32) -> u64 {
    let mut request = u64::from(data);
    request.set_bits(32..40, u64::from(command));
    request.set_bits(40..48, u64::from(domain.mailbox_id()));
    request.set_bits(48..56, u64::from(param2));
    request.set_bit(BUSY_BIT, true);
    request
}

/// Splits a raw request into `(command, domain id, param2, data)`.
#[cfg(any(test, feature = "test-util"))]
#[expect(clippy::cast_possible_truncation, reason = "fields are extracted by width")]
pub(crate) fn decode_request(request: u64) -> (u8, u8, u8, u32) {
    (
        request.get_bits(32..40) as u8,
        request.get_bits(40..48) as u8,
        request.get_bits(48..56) as u8,
        request.get_bits(0..32) as u32,
    )
}

/// Builds the raw register value of a completed command.
#[cfg(any(test, feature = "test-util"))]
pub(crate) fn encode_reply(code: u8, data: u32) -> u64 {
    let mut reply = u64::from(data);
    reply.set_bits(32..40, u64::from(code));
    reply
}

/// Submits one command and returns the data word of the reply.
pub(crate) fn transact<R>(
    registers: &R,
    command: u8,
    domain: DomainKind,
    param2: u8,
    data: u32,
) -> Result<u32>
where
    R: RegisterAccess + ?Sized,
{
    wait_until_idle(registers, command, domain)?;

    let request = encode_request(command, domain, param2, data);
    registers
        .write_msr(Msr::OcMailbox, request)
        .map_err(|status| Error::Msr {
            msr: Msr::OcMailbox,
            status,
        })?;

    let reply = wait_until_idle(registers, command, domain)?;

    #[expect(clippy::cast_possible_truncation, reason = "fields are extracted by width")]
    let code = reply.get_bits(32..40) as u8;

    if code != 0 {
        return Err(Error::Mailbox {
            command,
            domain,
            code,
        });
    }

    #[expect(clippy::cast_possible_truncation, reason = "fields are extracted by width")]
    let data = reply.get_bits(0..32) as u32;

    Ok(data)
}

fn wait_until_idle<R>(registers: &R, command: u8, domain: DomainKind) -> Result<u64>
where
    R: RegisterAccess + ?Sized,
{
    for _ in 0..MAILBOX_POLL_LIMIT {
        let value = registers
            .read_msr(Msr::OcMailbox)
            .map_err(|status| Error::Msr {
                msr: Msr::OcMailbox,
                status,
            })?;

        if !value.get_bit(BUSY_BIT) {
            return Ok(value);
        }

        hint::spin_loop();
    }

    Err(Error::MailboxTimeout { command, domain })
}

/// Divides, rounding half away from zero.
#[expect(clippy::integer_division, reason = "rounding is handled explicitly")]
#[expect(
    clippy::arithmetic_side_effects,
    reason = "denominator is a positive constant and numerators are a few thousand at most"
)]
fn div_round(numerator: i64, denominator: i64) -> i64 {
    let half = denominator / 2;

    if numerator >= 0 {
        (numerator + half) / denominator
    } else {
        (numerator - half) / denominator
    }
}

/// Millivolts to 1/1024 V steps.
fn millivolts_to_steps(voltage: Millivolts) -> i64 {
    div_round(i64::from(voltage.0).saturating_mul(1024), 1000)
}

/// 1/1024 V steps to millivolts.
#[expect(clippy::cast_possible_truncation, reason = "inputs are at most 12 bits wide")]
fn steps_to_millivolts(steps: i64) -> Millivolts {
    Millivolts(div_round(steps.saturating_mul(1000), 1024) as i32)
}

/// Encodes V/F settings into the mailbox data layout: ratio 7:0, target voltage 19:8,
/// mode 20, offset 31:21 (11-bit two's complement).
#[expect(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    reason = "values are clamped to the field width before conversion"
)]
pub(crate) fn encode_vf(settings: &VfSettings) -> u32 {
    let target = millivolts_to_steps(settings.target_voltage).clamp(0, 0xFFF) as u32;
    let offset = (millivolts_to_steps(settings.voltage_offset).clamp(-1024, 1023) as u32) & 0x7FF;

    let mut data = 0_u32;
    data.set_bits(0..8, u32::from(settings.max_ratio));
    data.set_bits(8..20, target);
    data.set_bit(20, settings.mode == VoltageMode::Override);
    data.set_bits(21..32, offset);
    data
}

/// Decodes the mailbox V/F data layout.
#[expect(clippy::cast_possible_truncation, reason = "fields are extracted by width")]
pub(crate) fn decode_vf(data: u32) -> VfSettings {
    let raw_offset = i64::from(data.get_bits(21..32));
    let offset = if raw_offset & 0x400 != 0 {
        raw_offset.saturating_sub(0x800)
    } else {
        raw_offset
    };

    VfSettings {
        max_ratio: data.get_bits(0..8) as u8,
        mode: if data.get_bit(20) {
            VoltageMode::Override
        } else {
            VoltageMode::Adaptive
        },
        target_voltage: steps_to_millivolts(i64::from(data.get_bits(8..20))),
        voltage_offset: steps_to_millivolts(offset),
    }
}

/// Encodes an IccMax limit using the field width of the given processor profile.
#[expect(clippy::integer_division, reason = "the field is rounded down to whole steps")]
pub(crate) fn encode_icc_max(icc_max: IccMax, profile: CpuProfile) -> u32 {
    let field_max = profile.icc_max_field_max();

    match icc_max {
        IccMax::Limit(current) => (current.0 / ICC_MAX_STEP_MILLIAMPS).min(field_max),
        IccMax::Unlimited if profile.unlimited_icc_max_flag => {
            let mut data = field_max;
            data.set_bit(ICC_MAX_UNLIMITED_BIT, true);
            data
        }
        IccMax::Unlimited => field_max,
    }
}

/// Decodes an IccMax limit using the field width of the given processor profile.
pub(crate) fn decode_icc_max(data: u32, profile: CpuProfile) -> IccMax {
    if profile.unlimited_icc_max_flag && data.get_bit(ICC_MAX_UNLIMITED_BIT) {
        return IccMax::Unlimited;
    }

    let raw = data & profile.icc_max_field_max();
    IccMax::Limit(Milliamps(raw.saturating_mul(ICC_MAX_STEP_MILLIAMPS)))
}

/// Reads the overclocking capabilities of a domain. The number of exposed curve points is not
/// reported by the mailbox and comes from the processor profile.
pub(crate) fn read_capability<R>(
    registers: &R,
    domain: DomainKind,
    profile: CpuProfile,
) -> Result<VfCapability>
where
    R: RegisterAccess + ?Sized,
{
    let data = transact(registers, READ_CAPABILITIES, domain, 0, 0)?;

    #[expect(clippy::cast_possible_truncation, reason = "fields are extracted by width")]
    let max_oc_ratio = data.get_bits(0..8) as u8;

    Ok(VfCapability {
        max_oc_ratio,
        ratio_unlocked: data.get_bit(8),
        voltage_override: data.get_bit(9),
        voltage_offset: data.get_bit(10),
        vf_points: profile.vf_points_exposed,
    })
}

/// Reads the V/F settings of a domain (`point` 0) or of one of its curve points (1-based).
pub(crate) fn read_vf<R>(registers: &R, domain: DomainKind, point: u8) -> Result<VfSettings>
where
    R: RegisterAccess + ?Sized,
{
    transact(registers, READ_VF, domain, point, 0).map(decode_vf)
}

/// Writes the V/F settings of a domain (`point` 0) or of one of its curve points (1-based).
pub(crate) fn write_vf<R>(
    registers: &R,
    domain: DomainKind,
    point: u8,
    settings: &VfSettings,
) -> Result<()>
where
    R: RegisterAccess + ?Sized,
{
    transact(registers, WRITE_VF, domain, point, encode_vf(settings)).map(|_| ())
}

/// Reads the IccMax current limit of a domain.
pub(crate) fn read_icc_max<R>(
    registers: &R,
    domain: DomainKind,
    profile: CpuProfile,
) -> Result<IccMax>
where
    R: RegisterAccess + ?Sized,
{
    transact(registers, READ_ICC_MAX, domain, 0, 0).map(|data| decode_icc_max(data, profile))
}

/// Writes the IccMax current limit of a domain.
pub(crate) fn write_icc_max<R>(
    registers: &R,
    domain: DomainKind,
    profile: CpuProfile,
    icc_max: IccMax,
) -> Result<()>
where
    R: RegisterAccess + ?Sized,
{
    transact(
        registers,
        WRITE_ICC_MAX,
        domain,
        0,
        encode_icc_max(icc_max, profile),
    )
    .map(|_| ())
}
