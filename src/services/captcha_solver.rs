use crate::error::{AppError, AppResult};
use regex::Regex;
use scraper::{Html, Selector};
use std::fmt;

const CAPTCHA_LABEL_SELECTOR: &str = "label[for=math_captcha]";
const CAPTCHA_PATTERN: &str = r"(\d+)\s*([+-])\s*(\d+)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Subtract,
}

/// 登录页上的算术验证码, 如 "3 + 5"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptchaExpression {
    pub lhs: i64,
    pub op: Operator,
    pub rhs: i64,
}

impl CaptchaExpression {
    pub fn answer(&self) -> AppResult<i64> {
        let answer = match self.op {
            Operator::Add => self.lhs.checked_add(self.rhs),
            Operator::Subtract => self.lhs.checked_sub(self.rhs),
        };
        answer.ok_or_else(|| AppError::CaptchaParse(format!("{} 超出范围", self)))
    }
}

impl fmt::Display for CaptchaExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            Operator::Add => '+',
            Operator::Subtract => '-',
        };
        write!(f, "{} {} {}", self.lhs, op, self.rhs)
    }
}

/// 验证码求解器
pub struct CaptchaSolver {
    label_selector: Selector,
    pattern: Regex,
}

impl CaptchaSolver {
    pub fn new() -> AppResult<Self> {
        let label_selector = Selector::parse(CAPTCHA_LABEL_SELECTOR)
            .map_err(|e| AppError::CaptchaParse(format!("invalid selector: {}", e)))?;
        let pattern = Regex::new(CAPTCHA_PATTERN)
            .map_err(|e| AppError::CaptchaParse(format!("invalid pattern: {}", e)))?;

        Ok(Self {
            label_selector,
            pattern,
        })
    }

    /// 从登录页 HTML 中找到验证码并解析
    pub fn extract_expression(&self, html: &str) -> AppResult<CaptchaExpression> {
        let document = Html::parse_document(html);
        let label = document
            .select(&self.label_selector)
            .next()
            .ok_or_else(|| AppError::CaptchaParse("登录页中没有验证码标签".to_string()))?;

        let text: String = label.text().collect();
        self.parse_expression(&text)
    }

    pub fn parse_expression(&self, text: &str) -> AppResult<CaptchaExpression> {
        let captures = self
            .pattern
            .captures(text)
            .ok_or_else(|| AppError::CaptchaParse(format!("{:?}", text.trim())))?;

        let operand = |index: usize| -> AppResult<i64> {
            captures[index]
                .parse::<i64>()
                .map_err(|e| AppError::CaptchaParse(format!("{}: {}", &captures[index], e)))
        };

        let op = match &captures[2] {
            "+" => Operator::Add,
            _ => Operator::Subtract,
        };

        let expression = CaptchaExpression {
            lhs: operand(1)?,
            op,
            rhs: operand(3)?,
        };
        expression.answer()?;
        Ok(expression)
    }

    /// 直接求出答案
    pub fn solve(&self, html: &str) -> AppResult<i64> {
        let expression = self.extract_expression(html)?;
        let answer = expression.answer()?;
        tracing::debug!("验证码: {} = {}", expression, answer);
        Ok(answer)
    }
}
