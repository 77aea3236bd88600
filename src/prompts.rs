//! Instruction templates and compact case serialization for the model
//!
//! Each analysis mode has one versioned template and its own subset of context
//! fields. Absent or blank fields are skipped entirely, never sent as empty labels.

use crate::context::{AnalysisContext, AnalysisMode};

/// A versioned instruction template
#[derive(Debug, Clone, Copy)]
pub struct Prompt {
    /// Stable identifier (format: mode-name-vN)
    pub id: &'static str,
    pub version: &'static str,
    pub template: &'static str,
    /// Context fields sent to the model, in order, with their case labels
    pub fields: &'static [CaseField],
}

/// How one context field is rendered in the case block
#[derive(Debug, Clone, Copy)]
pub struct CaseField {
    pub key: &'static str,
    pub label: &'static str,
    pub suffix: &'static str,
}

const fn field(key: &'static str, label: &'static str) -> CaseField {
    CaseField {
        key,
        label,
        suffix: "",
    }
}

const CLINICAL_TEMPLATE: &str = r#"Actúa como internista senior discutiendo un caso con colegas.
No repitas los datos del caso: aporta criterio clínico que cambie conducta.

Ordena los escenarios por urgencia:
- critical: requieren acción inmediata
- intermediate: requieren evaluación prioritaria
- manageable: abordaje ambulatorio razonable

Reglas:
- Frases cortas, lenguaje de pase de visita.
- Nada obvio; prioriza lo que modifica la conducta.
- Si faltan datos críticos, anótalos en data_gaps.
- Referencias solo por nombre corto de guía o criterio, sin URLs.

Responde únicamente con JSON:
{
  "scenarios": {
    "critical": [{"condition": "", "why": "", "action": ""}],
    "intermediate": [{"condition": "", "why": "", "action": ""}],
    "manageable": [{"condition": "", "why": "", "action": ""}]
  },
  "alert_findings": [""],
  "workup": [{"study": "", "target": ""}],
  "clinical_keys": [""],
  "references": [""],
  "data_gaps": [""]
}

Contexto: investigación sobre razonamiento de modelos. No es consejo médico."#;

const PIVOT_TEMPLATE: &str = r#"Actúa como segundo revisor de un caso con hipótesis de trabajo.
No repitas los datos del caso. Busca lo que obligaría a cambiar el plan.

Reglas:
- high_impact: diagnósticos graves que no se pueden dejar pasar.
- alternatives: explicaciones razonables distintas a la hipótesis.
- pivot_triggers: hallazgos que, si aparecen, cambian la conducta.
- blind_spots: sesgos o datos ignorados en el razonamiento actual.
- data_gaps: datos críticos faltantes.
- Frases cortas. Una razón por elemento.

Responde únicamente con JSON:
{
  "high_impact": [{"scenario": "", "rationale": ""}],
  "alternatives": [{"scenario": "", "rationale": ""}],
  "pivot_triggers": [{"finding": "", "rationale": ""}],
  "blind_spots": [""],
  "data_gaps": [""]
}

Contexto: investigación sobre razonamiento de modelos. No es consejo médico."#;

static CLINICAL_PROMPT: Prompt = Prompt {
    id: "clinical-case-discussion-v3",
    version: "3",
    template: CLINICAL_TEMPLATE,
    fields: &[
        field("patient_name", "Paciente"),
        CaseField {
            key: "age",
            label: "Edad",
            suffix: " años",
        },
        field("sex", "Sexo"),
        field("medical_history", "Antecedentes médicos"),
        field("socio_cultural", "Contexto socio-cultural"),
        field("reason_for_visit", "Motivo de consulta"),
        field("clinical_text", "Descripción clínica"),
    ],
};

static PIVOT_PROMPT: Prompt = Prompt {
    id: "pivot-second-look-v2",
    version: "2",
    template: PIVOT_TEMPLATE,
    fields: &[
        CaseField {
            key: "age",
            label: "Edad",
            suffix: " años",
        },
        field("sex", "Sexo"),
        field("medical_history", "Antecedentes médicos"),
        field("reason_for_visit", "Motivo de consulta"),
        field("working_diagnosis", "Hipótesis de trabajo"),
        field("clinical_text", "Descripción clínica"),
    ],
};

/// Tiny request used once at startup to load the model into memory
pub const WARMUP_PROMPT: &str = r#"Responde solo con {"ok": true}"#;

const NO_CASE_DATA: &str = "Sin información disponible.";

pub fn prompt_for(mode: AnalysisMode) -> &'static Prompt {
    match mode {
        AnalysisMode::Clinical => &CLINICAL_PROMPT,
        AnalysisMode::Pivot => &PIVOT_PROMPT,
    }
}

/// Render the mode's field subset as `Label: value` lines
pub fn format_case(context: &AnalysisContext) -> String {
    let prompt = prompt_for(context.mode());
    let lines: Vec<String> = prompt
        .fields
        .iter()
        .filter_map(|f| {
            let value = context.display_value(f.key)?;
            let value = if f.key == "sex" {
                expand_sex(&value)
            } else {
                value
            };
            Some(format!("{}: {}{}", f.label, value, f.suffix))
        })
        .collect();
    if lines.is_empty() {
        NO_CASE_DATA.to_string()
    } else {
        lines.join("\n")
    }
}

/// Full outbound prompt: instructions, then the case block
pub fn build_prompt(context: &AnalysisContext) -> String {
    let prompt = prompt_for(context.mode());
    format!(
        "{}\n\n--- CASO ---\n{}\n---\n\nJSON:",
        prompt.template,
        format_case(context)
    )
}

fn expand_sex(value: &str) -> String {
    match value.to_uppercase().as_str() {
        "M" => "Masculino".to_string(),
        "F" => "Femenino".to_string(),
        _ => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_absent_fields_are_omitted() {
        let ctx = AnalysisContext::new(
            AnalysisMode::Clinical,
            [
                ("age", json!(67)),
                ("sex", json!("F")),
                ("medical_history", json!("  ")),
                ("socio_cultural", Value::Null),
                ("clinical_text", json!("disnea súbita")),
                ("internal_note", json!("no enviar")),
            ],
        );
        let case = format_case(&ctx);
        assert_eq!(case, "Edad: 67 años\nSexo: Femenino\nDescripción clínica: disnea súbita");
        assert!(!case.contains("Antecedentes"));
        assert!(!build_prompt(&ctx).contains("no enviar"));
    }

    #[test]
    fn test_pivot_uses_its_own_subset() {
        let ctx = AnalysisContext::new(
            AnalysisMode::Pivot,
            [
                ("patient_name", json!("Ana")),
                ("working_diagnosis", json!("neumonía")),
                ("clinical_text", json!("tos y fiebre")),
            ],
        );
        let prompt = build_prompt(&ctx);
        assert!(prompt.starts_with(PIVOT_TEMPLATE));
        assert!(prompt.contains("Hipótesis de trabajo: neumonía"));
        assert!(!prompt.contains("Ana"));
        assert!(prompt.ends_with("---\n\nJSON:"));
    }

    #[test]
    fn test_empty_case() {
        let ctx = AnalysisContext::new(AnalysisMode::Clinical, Vec::<(String, Value)>::new());
        assert_eq!(format_case(&ctx), NO_CASE_DATA);
    }
}
