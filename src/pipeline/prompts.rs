//! Prompt construction for the generation capabilities.
//!
//! Each pipeline role has a fixed system preamble; per-stage request
//! bodies are assembled from the document, the plan, and the current file
//! map.

use crate::codemap::FileMap;

/// System preamble for the planning capability.
pub const PLANNER_SYSTEM_PROMPT: &str = r#"You are a research paper implementation specialist. Your role is to convert research paper content into detailed, actionable coding steps.

For each paper, provide a structured implementation plan that includes:

1. Project Structure
- List all required files and directories
- Specify the purpose of each file
- Define the main entry point

2. Dependencies
- Required Python packages and versions
- External libraries and tools
- Dataset requirements and sources

3. Implementation Steps
- Break down the paper's methodology into codeable steps
- Specify which files each component should be implemented in
- Include any mathematical formulas or algorithms that need to be implemented

4. Data Processing
- Dataset preparation steps
- Data preprocessing requirements
- Expected data formats and structures

Format your response in clear markdown with appropriate headers and code blocks where needed."#;

/// System preamble for the coding capability.
pub const CODER_SYSTEM_PROMPT: &str = r#"You are an expert in algorithmic coding in Python.
You will be given paper content and a coding implementation plan.
Generate all required files and directories as specified in the implementation plan.
Focus on implementing core algorithms and concepts.

For each file or directory, use one of these formats:
1. For files with content:
```path/filename.py
<code here>
```

2. For empty directories:
```path/directory/
```

3. For files that should exist but be empty:
```path/filename.py
```

Wrap each file or directory in a code block like this. Do NOT add explanation or comments outside code blocks.
Make sure to include all directories mentioned in the implementation plan, even if they're empty."#;

/// System preamble for the analysis capability.
pub const ANALYST_SYSTEM_PROMPT: &str = r#"You are a code analysis expert. You will be given paper content, an implementation plan, and the generated code files.
Assess how faithfully the code implements the paper's methodology, point out missing components, incorrect algorithms, and structural problems, and provide concrete, prioritized recommendations.
Format your response as clear markdown."#;

/// Request body for the implement stage.
pub fn implement_prompt(paper_content: &str, plan: &str) -> String {
    format!("Paper content:\n{}\n\nPlan:\n{}", paper_content, plan)
}

/// Request body for the analyze stage.
pub fn analyze_prompt(paper_content: &str, plan: &str, files: &FileMap) -> String {
    format!(
        "Paper content:\n{}\n\nPlan:\n{}\n\nCode blocks:\n{}",
        paper_content,
        plan,
        files.to_fenced()
    )
}

/// Request body for the improve stage.
pub fn improve_prompt(analysis: &str, files: &FileMap) -> String {
    format!(
        "Based on the following code analysis, improve the implementation:\n\n\
         Code Analysis:\n{}\n\n\
         Current Implementation:\n{}\n\
         Please provide improved versions of the code files that need modification.\n\
         Return code blocks in the following format:\n\
         ```filename.py\n<code here>\n```\n\
         Only include files that need improvement.",
        analysis,
        files.to_fenced()
    )
}

/// Initial task prompt for the self-healing workflow.
pub fn heal_task_prompt(paper_text: &str) -> String {
    format!(
        "Convert this research paper into working Python code. \
         Focus on implementing core algorithms and concepts.\n\n\
         Break down the implementation into multiple files if appropriate.\n\
         Paper content:\n{}\n\n\
         The application will be executed using the command: 'python main.py'.\n\
         Return code blocks in the following format:\n\
         ```filename.py\n<code here>\n```\n\
         Wrap each file's code in a code block like this. \
         Do NOT add explanation or comments outside code blocks.",
        paper_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompts_describe_their_roles() {
        assert!(PLANNER_SYSTEM_PROMPT.contains("implementation plan"));
        assert!(CODER_SYSTEM_PROMPT.contains("```path/filename.py"));
        assert!(ANALYST_SYSTEM_PROMPT.contains("recommendations"));
    }

    #[test]
    fn test_improve_prompt_embeds_current_files() {
        let files: FileMap = [("main.py".to_string(), Some("print(1)".to_string()))]
            .into_iter()
            .collect();
        let prompt = improve_prompt("needs error handling", &files);
        assert!(prompt.contains("needs error handling"));
        assert!(prompt.contains("```main.py"));
        assert!(prompt.contains("Only include files that need improvement."));
    }

    #[test]
    fn test_heal_task_prompt_names_entry_command() {
        let prompt = heal_task_prompt("paper text");
        assert!(prompt.contains("python main.py"));
        assert!(prompt.contains("paper text"));
    }
}
