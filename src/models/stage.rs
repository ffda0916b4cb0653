use serde::{Deserialize, Serialize};

/// 生成阶段
///
/// 阶段按固定顺序执行：形成性评价 → 总结性评价 → 样题 → 派生结构。
/// 枚举的声明顺序即执行顺序，`Ord` 依赖于此。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// 形成性评价（按模块生成）
    Formative,
    /// 总结性评价（按模块生成）
    Summative,
    /// 样题（按题型生成）
    Samples,
    /// 派生结构（基于前面阶段的产出）
    Derived,
}

impl StageKind {
    /// 固定执行顺序
    pub const ORDER: [StageKind; 4] = [
        StageKind::Formative,
        StageKind::Summative,
        StageKind::Samples,
        StageKind::Derived,
    ];

    /// 协议中使用的标识
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Formative => "formative",
            StageKind::Summative => "summative",
            StageKind::Samples => "samples",
            StageKind::Derived => "derived",
        }
    }

    /// 获取标准名称
    pub fn name(self) -> &'static str {
        match self {
            StageKind::Formative => "形成性评价",
            StageKind::Summative => "总结性评价",
            StageKind::Samples => "样题",
            StageKind::Derived => "派生结构",
        }
    }

    /// 必需阶段一个产出都没有时整个运行失败；可选阶段只记录
    pub fn is_required(self) -> bool {
        matches!(self, StageKind::Formative | StageKind::Summative)
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 样题题型（固定五类）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    /// 单选题
    MultipleChoice,
    /// 判断题
    TrueFalse,
    /// 简答题
    ShortAnswer,
    /// 论述题
    Essay,
    /// 案例分析题
    CaseStudy,
}

impl QuestionCategory {
    pub const ALL: [QuestionCategory; 5] = [
        QuestionCategory::MultipleChoice,
        QuestionCategory::TrueFalse,
        QuestionCategory::ShortAnswer,
        QuestionCategory::Essay,
        QuestionCategory::CaseStudy,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QuestionCategory::MultipleChoice => "multiple_choice",
            QuestionCategory::TrueFalse => "true_false",
            QuestionCategory::ShortAnswer => "short_answer",
            QuestionCategory::Essay => "essay",
            QuestionCategory::CaseStudy => "case_study",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            QuestionCategory::MultipleChoice => "单选题",
            QuestionCategory::TrueFalse => "判断题",
            QuestionCategory::ShortAnswer => "简答题",
            QuestionCategory::Essay => "论述题",
            QuestionCategory::CaseStudy => "案例分析题",
        }
    }

    /// 每个题型的 token 预算
    ///
    /// 论述题和案例分析题需要带参考答案与评分要点，预算更大
    pub fn max_tokens(self) -> u32 {
        match self {
            QuestionCategory::MultipleChoice => 1_500,
            QuestionCategory::TrueFalse => 800,
            QuestionCategory::ShortAnswer => 1_200,
            QuestionCategory::Essay => 2_000,
            QuestionCategory::CaseStudy => 2_500,
        }
    }
}

impl std::fmt::Display for QuestionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 派生结构的目标格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedFormat {
    /// 评价蓝图（目标 × 评价方式矩阵）
    AssessmentBlueprint,
    /// 题库结构
    QuestionBank,
    /// 学习平台导入包结构
    LmsPackage,
}

impl DerivedFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            DerivedFormat::AssessmentBlueprint => "assessment_blueprint",
            DerivedFormat::QuestionBank => "question_bank",
            DerivedFormat::LmsPackage => "lms_package",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DerivedFormat::AssessmentBlueprint => "评价蓝图",
            DerivedFormat::QuestionBank => "题库结构",
            DerivedFormat::LmsPackage => "平台导入包",
        }
    }
}

impl std::fmt::Display for DerivedFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_matches_declaration() {
        let mut sorted = StageKind::ORDER;
        sorted.sort();
        assert_eq!(sorted, StageKind::ORDER);
        assert!(StageKind::Formative < StageKind::Derived);
    }

    #[test]
    fn test_category_serde_name() {
        let json = serde_json::to_string(&QuestionCategory::CaseStudy).unwrap();
        assert_eq!(json, "\"case_study\"");
    }
}
