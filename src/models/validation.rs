//! 请求校验
//!
//! 所有规则都在任何阶段执行之前检查，失败时不会发起生成调用。

use std::collections::HashSet;
use std::ops::RangeInclusive;

use crate::error::ValidationError;
use crate::models::request::{AssessmentPrefs, GenerationRequest};
use crate::models::stage::StageKind;

/// 步骤编号的合法范围
pub const STEP_RANGE: RangeInclusive<u8> = 1..=5;
/// 每个模块 / 题型的生成数量范围
pub const COUNT_RANGE: RangeInclusive<u8> = 1..=5;
/// 课程描述的最少字符数
pub const MIN_DESCRIPTION_CHARS: usize = 10;
/// 权重之和的容差
pub const WEIGHT_TOLERANCE: f64 = 0.1;

/// 校验规则开关
#[derive(Debug, Clone, Copy)]
pub struct ValidationRules {
    pub require_description: bool,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            require_description: true,
        }
    }
}

/// 校验生成请求
pub fn validate_request(
    request: &GenerationRequest,
    rules: ValidationRules,
) -> Result<(), ValidationError> {
    if rules.require_description {
        check_description(request.context.subject_description.as_deref())?;
    }

    if !STEP_RANGE.contains(&request.stage_id) {
        return Err(ValidationError::StepOutOfRange {
            value: request.stage_id,
            min: *STEP_RANGE.start(),
            max: *STEP_RANGE.end(),
        });
    }

    let prefs = &request.preferences;
    if request.requested_stages().is_empty() {
        return Err(ValidationError::NoStageRequested);
    }

    if let Some(formative) = &prefs.formative {
        check_count("formative.per_unit", formative.per_unit)?;
        check_weight(StageKind::Formative, formative)?;
    }
    if let Some(summative) = &prefs.summative {
        check_count("summative.per_unit", summative.per_unit)?;
        check_weight(StageKind::Summative, summative)?;
    }
    if let (Some(f), Some(s)) = (
        prefs.formative.as_ref().and_then(|p| p.weight),
        prefs.summative.as_ref().and_then(|p| p.weight),
    ) {
        if ((f + s) - 100.0).abs() > WEIGHT_TOLERANCE {
            return Err(ValidationError::WeightsMismatch {
                formative: f,
                summative: s,
            });
        }
    }

    if let Some(samples) = &prefs.samples {
        check_count("samples.per_category", samples.per_category)?;
    }
    if let Some(derived) = &prefs.derived {
        if derived.formats.is_empty() {
            return Err(ValidationError::NoDerivedFormats);
        }
    }

    for stage in [StageKind::Formative, StageKind::Summative] {
        if prefs.is_requested(stage) && request.units.is_empty() {
            return Err(ValidationError::NoUnits { stage });
        }
    }

    let mut seen = HashSet::new();
    for (index, unit) in request.units.iter().enumerate() {
        if unit.id.trim().is_empty() {
            return Err(ValidationError::BlankUnitId { index });
        }
        if !seen.insert(unit.id.as_str()) {
            return Err(ValidationError::DuplicateUnitId {
                id: unit.id.clone(),
            });
        }
    }

    Ok(())
}

fn check_description(description: Option<&str>) -> Result<(), ValidationError> {
    let trimmed = description.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Err(ValidationError::DescriptionMissing);
    }
    let len = trimmed.chars().count();
    if len < MIN_DESCRIPTION_CHARS {
        return Err(ValidationError::DescriptionTooShort {
            len,
            min: MIN_DESCRIPTION_CHARS,
        });
    }
    Ok(())
}

fn check_count(field: &'static str, value: u8) -> Result<(), ValidationError> {
    if COUNT_RANGE.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::CountOutOfRange {
            field,
            value,
            min: *COUNT_RANGE.start(),
            max: *COUNT_RANGE.end(),
        })
    }
}

fn check_weight(stage: StageKind, prefs: &AssessmentPrefs) -> Result<(), ValidationError> {
    match prefs.weight {
        Some(value) if !(0.0..=100.0).contains(&value) => {
            Err(ValidationError::WeightOutOfRange { stage, value })
        }
        _ => Ok(()),
    }
}
